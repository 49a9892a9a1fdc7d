//! Daemon connection (spec §4.1 "Daemon RPC" dispatch target; §2 "a daemon
//! owns many sessions under one connection"). One physical WebSocket
//! multiplexes every session the daemon has attached — session-scoped
//! outbound messages are tagged with `sessionId` (see
//! `ProducerBinding::session_tag`) and session-scoped inbound messages
//! that lack one (`encrypted-output` keyed by `viewerId`, `output-history`
//! with neither) are resolved through the directory's viewer index or the
//! connection's last-seen session (see `DESIGN.md` for why `output-history`
//! can only ever be a best-effort guess in daemon mode).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use termcast_protocol::{DaemonCommandResponse, DaemonId, ProducerInbound, ProducerOutbound, SessionId, ViewerOutbound};

use crate::directory::DaemonHandle;
use crate::model::ProducerBinding;
use crate::reap;
use crate::state::AppState;
use crate::ws::producer;

pub async fn run(socket: WebSocket, state: AppState) {
    let daemon_id = DaemonId::from(Uuid::new_v4().to_string());
    let connection = Uuid::new_v4();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ProducerOutbound>();
    let handle = Arc::new(DaemonHandle::new(None, out_tx));
    state.directory.register_daemon(daemon_id.clone(), handle.clone());
    info!(daemon_id = %daemon_id, "daemon connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let outbound_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let text = serde_json::to_string(&msg).expect("ProducerOutbound always serializes");
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut last_session: Option<SessionId> = None;

    loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ProducerInbound>(&text) {
                Ok(inbound) => {
                    handle_message(&state, &handle, connection, &mut last_session, inbound).await
                }
                Err(err) => warn!(%err, "malformed daemon frame"),
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(_)) => break,
        }
    }

    outbound_task.abort();
    disconnect(&state, &daemon_id, &handle, connection).await;
}

async fn handle_message(
    state: &AppState,
    handle: &Arc<DaemonHandle>,
    connection: Uuid,
    last_session: &mut Option<SessionId>,
    msg: ProducerInbound,
) {
    match msg {
        ProducerInbound::SessionAttached { session_id, public_key, encrypted } => {
            let session = state.directory.get_or_create(session_id.clone(), handle.user_id.clone());
            {
                let mut sess = session.lock().await;
                if let Some(prev) = sess.producer.take() {
                    prev.cancel.cancel();
                }
                sess.producer = Some(ProducerBinding {
                    connection,
                    public_key: Some(public_key.clone()),
                    outbound: handle.outbound.clone(),
                    cancel: CancellationToken::new(),
                    wire_session_id: Some(session_id.clone()),
                });
                sess.encrypted = encrypted;
                sess.empty_since = None;
                sess.broadcast_to_viewers(&ViewerOutbound::CliStatus {
                    connected: true,
                    public_key: Some(public_key),
                    encrypted,
                });
            }
            handle.active_session_ids.lock().await.push(session_id.clone());
            *last_session = Some(session_id);
        }
        ProducerInbound::SessionDetached { session_id } => {
            if let Some(session) = state.directory.get(&session_id) {
                let mut sess = session.lock().await;
                if sess.producer.as_ref().map(|p| p.connection) == Some(connection) {
                    sess.producer = None;
                    let encrypted = sess.encrypted;
                    sess.broadcast_to_viewers(&ViewerOutbound::CliStatus {
                        connected: false,
                        public_key: None,
                        encrypted,
                    });
                    let empty = sess.is_empty();
                    drop(sess);
                    if empty {
                        reap::schedule(state.directory.clone(), session_id.clone(), session.clone());
                    }
                }
            }
            handle.active_session_ids.lock().await.retain(|id| id != &session_id);
        }
        ProducerInbound::ActiveSessions { sessions } => {
            debug!(count = sessions.len(), "daemon reported active sessions");
        }
        ProducerInbound::CliResponse { command_id, success, data, error } => {
            handle.resolve(DaemonCommandResponse { command_id, success, data, error });
        }
        ProducerInbound::EncryptedOutput { viewer_id, encrypted, seq, timestamp } => {
            if let Some(session) = state.directory.session_for_viewer(&viewer_id) {
                *last_session = Some(session.lock().await.session_id.clone());
                producer::handle_session_message(
                    &session,
                    ProducerInbound::EncryptedOutput { viewer_id, encrypted, seq, timestamp },
                )
                .await;
            }
        }
        ProducerInbound::OutputHistory { encrypted, seq, timestamp } => {
            // No viewerId or sessionId on this message (spec §6) — best
            // effort, resolved against whichever session this connection
            // last touched. See DESIGN.md.
            if let Some(session_id) = last_session.clone() {
                if let Some(session) = state.directory.get(&session_id) {
                    producer::handle_session_message(
                        &session,
                        ProducerInbound::OutputHistory { encrypted, seq, timestamp },
                    )
                    .await;
                }
            }
        }
        ProducerInbound::Output { .. } => {
            warn!("daemon sessions are always encrypted; ignoring plaintext output");
        }
    }
}

async fn disconnect(state: &AppState, daemon_id: &DaemonId, handle: &Arc<DaemonHandle>, connection: Uuid) {
    state.directory.unregister_daemon(daemon_id);
    let session_ids = handle.active_session_ids.lock().await.clone();
    for session_id in session_ids {
        if let Some(session) = state.directory.get(&session_id) {
            let mut sess = session.lock().await;
            if sess.producer.as_ref().map(|p| p.connection) == Some(connection) {
                sess.producer = None;
                let encrypted = sess.encrypted;
                sess.broadcast_to_viewers(&ViewerOutbound::CliStatus {
                    connected: false,
                    public_key: None,
                    encrypted,
                });
                let empty = sess.is_empty();
                drop(sess);
                if empty {
                    reap::schedule(state.directory.clone(), session_id.clone(), session.clone());
                }
            }
        }
    }
    info!(daemon_id = %daemon_id, "daemon disconnected");
}
