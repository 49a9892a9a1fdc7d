//! Viewer connection (spec §4.1 "Viewer binding", "History retrieval",
//! "Input routing & control lock", "Viewer termination").

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use termcast_protocol::{
    ConnectQuery, ProducerOutbound, SessionId, ViewerId, ViewerInbound, ViewerOutbound,
};

use crate::model::{Session, ViewerBinding};
use crate::reap;
use crate::state::AppState;
use crate::ws::control;

#[instrument(skip(socket, state))]
pub async fn run(socket: WebSocket, query: ConnectQuery, state: AppState) {
    let session_id = SessionId::from(query.session_id.expect("checked by ws::handle_socket"));
    let session = state.directory.get_or_create(session_id.clone(), None);
    let viewer_id = ViewerId::from(Uuid::new_v4().to_string());
    let nickname = query.nickname.clone();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ViewerOutbound>();

    bind_viewer(&session, &viewer_id, query.public_key.clone(), nickname.clone(), out_tx.clone()).await;
    state.directory.link_viewer(viewer_id.clone(), session_id.clone());
    info!(session_id = %session_id, viewer_id = %viewer_id, "viewer connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let outbound_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let text = serde_json::to_string(&msg).expect("ViewerOutbound always serializes");
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(next) = ws_rx.next().await {
        match next {
            Ok(Message::Text(text)) => match serde_json::from_str::<ViewerInbound>(&text) {
                Ok(inbound) => handle_message(&session, &session_id, &viewer_id, &nickname, inbound).await,
                Err(err) => warn!(%err, "malformed viewer frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    outbound_task.abort();
    unbind_viewer(&state, &session_id, &session, &viewer_id).await;
}

async fn bind_viewer(
    session: &Arc<Mutex<Session>>,
    viewer_id: &ViewerId,
    public_key: Option<String>,
    nickname: Option<String>,
    outbound: mpsc::UnboundedSender<ViewerOutbound>,
) {
    let mut sess = session.lock().await;
    sess.viewers.insert(
        viewer_id.clone(),
        ViewerBinding { public_key: public_key.clone(), nickname, outbound: outbound.clone() },
    );
    sess.empty_since = None;

    let _ = outbound.send(ViewerOutbound::CliStatus {
        connected: sess.producer.is_some(),
        public_key: sess.producer.as_ref().and_then(|p| p.public_key.clone()),
        encrypted: sess.encrypted,
    });

    if sess.encrypted {
        if sess.producer.is_some() {
            let tag = sess.producer.as_ref().unwrap().session_tag(&sess.session_id);
            sess.notify_producer(ProducerOutbound::ViewerJoined {
                session_id: tag,
                viewer_id: viewer_id.clone(),
                public_key: public_key.unwrap_or_default(),
            });
        }
    } else if let Some(last) = sess.last_output.clone() {
        let _ = outbound.send(ViewerOutbound::Output {
            seq: last.seq,
            content: last.content,
            timestamp: last.timestamp,
        });
    }
}

async fn handle_message(
    session: &Arc<Mutex<Session>>,
    session_id: &SessionId,
    viewer_id: &ViewerId,
    nickname: &Option<String>,
    msg: ViewerInbound,
) {
    match msg {
        ViewerInbound::Input { keys, kind } => {
            let mut sess = session.lock().await;
            let (outcome, status) = control::gate_input(&mut sess, viewer_id);
            match outcome {
                control::GateOutcome::Rejected => {
                    if let Some(viewer) = sess.viewers.get(viewer_id) {
                        let _ = viewer.outbound.send(ViewerOutbound::InputRejected {
                            reason: "not-controller".into(),
                        });
                    }
                }
                control::GateOutcome::Forward => {
                    if let Some(status) = &status {
                        sess.broadcast_to_viewers(status);
                    }
                    let delivered = sess.notify_producer(ProducerOutbound::Input { keys, kind });
                    if !delivered {
                        if let Some(viewer) = sess.viewers.get(viewer_id) {
                            let _ = viewer.outbound.send(ViewerOutbound::Error {
                                message: "CLI not connected".into(),
                            });
                        }
                    }
                }
            }
        }
        ViewerInbound::EncryptedInput { encrypted } => {
            let mut sess = session.lock().await;
            let (outcome, status) = control::gate_input(&mut sess, viewer_id);
            match outcome {
                control::GateOutcome::Rejected => {
                    if let Some(viewer) = sess.viewers.get(viewer_id) {
                        let _ = viewer.outbound.send(ViewerOutbound::InputRejected {
                            reason: "not-controller".into(),
                        });
                    }
                }
                control::GateOutcome::Forward => {
                    if let Some(status) = &status {
                        sess.broadcast_to_viewers(status);
                    }
                    let tag = sess.producer.as_ref().and_then(|p| p.session_tag(session_id));
                    let delivered = sess.notify_producer(ProducerOutbound::EncryptedInput {
                        session_id: tag,
                        viewer_id: viewer_id.clone(),
                        encrypted,
                    });
                    if !delivered {
                        if let Some(viewer) = sess.viewers.get(viewer_id) {
                            let _ = viewer.outbound.send(ViewerOutbound::Error {
                                message: "CLI not connected".into(),
                            });
                        }
                    }
                }
            }
        }
        ViewerInbound::RequestControl => {
            let mut sess = session.lock().await;
            match control::request_control(&mut sess, viewer_id.clone(), nickname.clone()) {
                control::RequestOutcome::Granted(status) => sess.broadcast_to_viewers(&status),
                control::RequestOutcome::Denied(denial) => {
                    if let Some(viewer) = sess.viewers.get(viewer_id) {
                        let _ = viewer.outbound.send(denial);
                    }
                }
            }
        }
        ViewerInbound::ReleaseControl => {
            let mut sess = session.lock().await;
            if let Some(status) = control::release_control(&mut sess, viewer_id) {
                sess.broadcast_to_viewers(&status);
            }
        }
        ViewerInbound::GetHistory => {
            let sess = session.lock().await;
            let Some(viewer) = sess.viewers.get(viewer_id) else { return };
            if sess.encrypted {
                let history = sess.encrypted_history.iter().cloned().collect();
                let _ = viewer.outbound.send(ViewerOutbound::EncryptedHistory { history });
            } else {
                let history = sess.output_history.iter().cloned().collect();
                let _ = viewer.outbound.send(ViewerOutbound::History { history });
            }
        }
    }
}

async fn unbind_viewer(state: &AppState, session_id: &SessionId, session: &Arc<Mutex<Session>>, viewer_id: &ViewerId) {
    state.directory.unlink_viewer(viewer_id);
    let mut sess = session.lock().await;
    sess.viewers.remove(viewer_id);
    if let Some(status) = control::clear_if_holder(&mut sess, viewer_id) {
        sess.broadcast_to_viewers(&status);
    }
    let tag = sess.producer.as_ref().and_then(|p| p.session_tag(session_id));
    sess.notify_producer(ProducerOutbound::ViewerLeft { session_id: tag, viewer_id: viewer_id.clone() });
    let empty = sess.is_empty();
    drop(sess);
    info!(session_id = %session_id, viewer_id = %viewer_id, "viewer disconnected");
    if empty {
        reap::schedule(state.directory.clone(), session_id.clone(), session.clone());
    }
}
