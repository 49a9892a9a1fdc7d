//! Single-session producer connection (spec §4.1 "Producer binding",
//! "Producer termination"). A daemon connection multiplexing many
//! sessions is handled separately in `ws::daemon` but shares the
//! session-scoped message handling below.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use termcast_protocol::{
    ConnectQuery, EncryptedHistoryEntry, OutputEvent, ProducerInbound, ProducerOutbound,
    SessionId, ViewerOutbound,
};

use crate::directory::derive_user_id;
use crate::model::{ProducerBinding, Session};
use crate::reap;
use crate::state::AppState;

#[instrument(skip(socket, state))]
pub async fn run(socket: WebSocket, query: ConnectQuery, state: AppState) {
    let session_id = SessionId::from(query.session_id.expect("checked by ws::handle_socket"));
    let user_id = query.user_secret.as_deref().map(derive_user_id);
    let session = state.directory.get_or_create(session_id.clone(), user_id);
    let connection = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ProducerOutbound>();
    let encrypted = query.public_key.is_some();

    bind_producer(&session, connection, query.public_key.clone(), out_tx, cancel.clone(), encrypted).await;
    info!(session_id = %session_id, encrypted, "producer connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let outbound_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let text = serde_json::to_string(&msg).expect("ProducerOutbound always serializes");
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = ws_rx.next() => match next {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ProducerInbound>(&text) {
                        Ok(inbound) => handle_session_message(&session, inbound).await,
                        Err(err) => warn!(%err, "malformed producer frame"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }

    outbound_task.abort();
    unbind_producer(&state, &session_id, &session, connection).await;
}

async fn bind_producer(
    session: &Arc<Mutex<Session>>,
    connection: Uuid,
    public_key: Option<String>,
    outbound: mpsc::UnboundedSender<ProducerOutbound>,
    cancel: CancellationToken,
    encrypted: bool,
) {
    let mut sess = session.lock().await;
    // spec §3 invariant: "at most one producer connection per session at
    // any instant; replacement closes the prior binding."
    if let Some(prev) = sess.producer.take() {
        prev.cancel.cancel();
    }
    sess.producer = Some(ProducerBinding {
        connection,
        public_key: public_key.clone(),
        outbound,
        cancel,
        wire_session_id: None,
    });
    sess.encrypted = encrypted;
    sess.empty_since = None;
    sess.broadcast_to_viewers(&ViewerOutbound::CliStatus {
        connected: true,
        public_key,
        encrypted,
    });
}

async fn unbind_producer(state: &AppState, session_id: &SessionId, session: &Arc<Mutex<Session>>, connection: Uuid) {
    let mut sess = session.lock().await;
    let still_ours = sess.producer.as_ref().map(|p| p.connection) == Some(connection);
    if !still_ours {
        // We were replaced by a newer producer binding; leave its state alone.
        return;
    }
    sess.producer = None;
    let encrypted = sess.encrypted;
    sess.broadcast_to_viewers(&ViewerOutbound::CliStatus {
        connected: false,
        public_key: None,
        encrypted,
    });
    let empty = sess.is_empty();
    drop(sess);
    info!(session_id = %session_id, "producer disconnected");
    if empty {
        reap::schedule(state.directory.clone(), session_id.clone(), session.clone());
    }
}

/// Handles the three session-scoped producer->relay messages
/// (`output`, `encrypted-output`, `output-history`). Shared by the
/// single-session handler above and the daemon RPC dispatcher, which
/// resolves which `Session` these apply to differently (see `ws::daemon`).
pub(crate) async fn handle_session_message(session: &Arc<Mutex<Session>>, msg: ProducerInbound) {
    match msg {
        ProducerInbound::Output { seq, content, timestamp } => {
            let mut sess = session.lock().await;
            let event = OutputEvent { seq, content, timestamp };
            sess.last_output = Some(event.clone());
            sess.push_output_history(event.clone());
            sess.last_seq_seen = Some(seq);
            sess.broadcast_to_viewers(&ViewerOutbound::Output {
                seq: event.seq,
                content: event.content,
                timestamp: event.timestamp,
            });
        }
        ProducerInbound::EncryptedOutput { viewer_id, encrypted, seq, timestamp } => {
            let mut sess = session.lock().await;
            sess.last_seq_seen = Some(seq);
            if let Some(viewer) = sess.viewers.get(&viewer_id) {
                let _ = viewer.outbound.send(ViewerOutbound::EncryptedOutput { encrypted, seq, timestamp });
            }
        }
        ProducerInbound::OutputHistory { encrypted, seq, timestamp } => {
            let mut sess = session.lock().await;
            sess.push_encrypted_history(EncryptedHistoryEntry { encrypted, seq, timestamp });
        }
        other => {
            warn!(?other, "daemon-only message received on a single-session producer connection");
        }
    }
}
