//! The multi-session daemon: one physical relay connection, many attached
//! sessions, driven by RPC (spec §4.2 "daemon RPC command set"). Each
//! attached session gets its own `ProducerCore` task; this module demuxes
//! inbound relay messages to the right one by `sessionId` and executes
//! `list-sessions`/`create-session`/`attach-session`/`detach-session`
//! itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use termcast_crypto::PairingCode;
use termcast_protocol::{DaemonCommand, ProducerInbound, ProducerOutbound, SessionId};

use crate::capture::{PaneCapture, PaneCaptureFactory};
use crate::core::ProducerCore;
use crate::error::ControllerError;
use crate::now_ms;

struct AttachedSession {
    to_core: mpsc::UnboundedSender<ProducerOutbound>,
    task: JoinHandle<()>,
    viewer_count: Arc<AtomicUsize>,
}

/// Owns every session this daemon process currently has attached, plus the
/// single shared sender back to the relay connection.
pub struct Daemon<F: PaneCaptureFactory> {
    factory: F,
    poll_interval: Duration,
    sessions: HashMap<String, AttachedSession>,
    outbound: mpsc::UnboundedSender<ProducerInbound>,
}

impl<F: PaneCaptureFactory> Daemon<F> {
    pub fn new(factory: F, poll_interval: Duration, outbound: mpsc::UnboundedSender<ProducerInbound>) -> Self {
        Daemon { factory, poll_interval, sessions: HashMap::new(), outbound }
    }

    /// Re-announces every still-attached session after a reconnect (spec
    /// §4.2 ambient additions: "reconnect re-announcement"). The relay has
    /// no way to re-bind a producer connection to its prior sessions other
    /// than a fresh `session-attached`, so this detaches and reattaches
    /// each one rather than trying to replay state the relay never kept.
    pub async fn reattach_all_after_reconnect(&mut self) {
        let names: Vec<String> = self.sessions.keys().cloned().collect();
        for name in names {
            if let Err(err) = self.detach(&name).await {
                warn!(session = %name, %err, "failed to detach before reattach");
                continue;
            }
            if let Err(err) = self.attach(&name).await {
                warn!(session = %name, %err, "failed to reattach after reconnect");
            }
        }
    }

    pub async fn handle_relay_message(&mut self, msg: ProducerOutbound) {
        match &msg {
            ProducerOutbound::ViewerJoined { session_id, .. }
            | ProducerOutbound::ViewerLeft { session_id, .. }
            | ProducerOutbound::EncryptedInput { session_id, .. } => {
                let Some(session_id) = session_id else {
                    warn!("daemon received an untagged session message, dropping");
                    return;
                };
                if let Some(session) = self.sessions.get(session_id.as_str()) {
                    let _ = session.to_core.send(msg);
                } else {
                    warn!(%session_id, "message for unknown or detached session");
                }
            }
            ProducerOutbound::Input { .. } => {
                warn!("daemon sessions are always encrypted, ignoring plaintext input");
            }
            ProducerOutbound::CliCommand { command_id, command, params } => {
                let response = self.execute(command, params.clone()).await;
                let _ = self.outbound.send(ProducerInbound::CliResponse {
                    command_id: command_id.clone(),
                    success: response.is_ok(),
                    data: response.as_ref().ok().cloned(),
                    error: response.err().map(|err| err.to_string()),
                });
            }
        }
    }

    async fn execute(
        &mut self,
        command: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ControllerError> {
        let envelope = json!({ "command": command, "params": params });
        let parsed: DaemonCommand = serde_json::from_value(envelope)
            .map_err(|err| ControllerError::Capture(format!("malformed command params: {err}")))?;

        match parsed {
            DaemonCommand::ListSessions => {
                let known = self.factory.list_known().await?;
                let active: Vec<&String> = self.sessions.keys().collect();
                let rows: Vec<_> = known
                    .iter()
                    .map(|name| {
                        let attached = self.sessions.get(name);
                        json!({
                            "name": name,
                            "attached": attached.is_some(),
                            "viewerCount": attached.map(|s| s.viewer_count.load(Ordering::Relaxed)).unwrap_or(0),
                        })
                    })
                    .collect();
                Ok(json!({ "all": known, "active": active, "sessions": rows }))
            }
            DaemonCommand::CreateSession { name } => {
                self.factory.create(&name).await?;
                Ok(json!({ "name": name }))
            }
            DaemonCommand::AttachSession { name } => self.attach(&name).await,
            DaemonCommand::DetachSession { name } => {
                self.detach(&name).await?;
                Ok(json!({ "name": name }))
            }
        }
    }

    async fn attach(&mut self, name: &str) -> Result<serde_json::Value, ControllerError> {
        if self.sessions.contains_key(name) {
            return Err(ControllerError::AlreadyAttached(name.to_string()));
        }
        let capture = self.factory.open(name).await?;
        let core = ProducerCore::new(capture, self.poll_interval);
        let public_key = core.public_key_base64();
        let viewer_count = core.viewer_count_handle();

        let (to_core_tx, to_core_rx) = mpsc::unbounded_channel();
        let session_outbound = self.outbound.clone();
        let task = tokio::spawn(core.run(to_core_rx, session_outbound));

        self.sessions.insert(
            name.to_string(),
            AttachedSession { to_core: to_core_tx, task, viewer_count },
        );

        let _ = self.outbound.send(ProducerInbound::SessionAttached {
            session_id: SessionId::from(name),
            public_key: public_key.clone(),
            encrypted: true,
        });

        let pairing_code = PairingCode::new(name, public_key.clone(), now_ms()).encode();
        Ok(json!({ "name": name, "publicKey": public_key, "pairingCode": pairing_code }))
    }

    async fn detach(&mut self, name: &str) -> Result<(), ControllerError> {
        let session = self
            .sessions
            .remove(name)
            .ok_or_else(|| ControllerError::UnknownSession(name.to_string()))?;
        // dropping `to_core` ends the core's `run` loop on its next recv().
        drop(session.to_core);
        session.task.abort();
        let _ = self.outbound.send(ProducerInbound::SessionDetached { session_id: SessionId::from(name) });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeCapture {
        content: Vec<u8>,
        injected: Vec<String>,
    }

    impl PaneCapture for FakeCapture {
        async fn capture(&mut self) -> Result<Vec<u8>, ControllerError> {
            Ok(self.content.clone())
        }
        async fn inject(&mut self, payload: &termcast_protocol::InputPayload) -> Result<(), ControllerError> {
            self.injected.push(payload.keys.clone());
            Ok(())
        }
    }

    struct FakeFactory {
        known: std::sync::Mutex<Vec<String>>,
    }

    impl PaneCaptureFactory for FakeFactory {
        type Capture = FakeCapture;

        async fn list_known(&self) -> Result<Vec<String>, ControllerError> {
            Ok(self.known.lock().unwrap().clone())
        }

        async fn create(&self, name: &str) -> Result<(), ControllerError> {
            let mut known = self.known.lock().unwrap();
            if known.iter().any(|n| n == name) {
                return Err(ControllerError::SessionExists(name.to_string()));
            }
            known.push(name.to_string());
            Ok(())
        }

        async fn open(&self, name: &str) -> Result<Self::Capture, ControllerError> {
            if !self.known.lock().unwrap().iter().any(|n| n == name) {
                return Err(ControllerError::UnknownSession(name.to_string()));
            }
            Ok(FakeCapture { content: Vec::new(), injected: Vec::new() })
        }
    }

    fn daemon() -> (Daemon<FakeFactory>, mpsc::UnboundedReceiver<ProducerInbound>) {
        let factory = FakeFactory { known: std::sync::Mutex::new(vec!["a".to_string()]) };
        let (tx, rx) = mpsc::unbounded_channel();
        (Daemon::new(factory, Duration::from_millis(10), tx), rx)
    }

    #[tokio::test]
    async fn create_session_rejects_duplicate_name() {
        let (mut d, _rx) = daemon();
        let result = d.execute("create-session", Some(json!({"name": "a"}))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn attach_session_rejects_unknown_name() {
        let (mut d, _rx) = daemon();
        let result = d.execute("attach-session", Some(json!({"name": "missing"}))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn attach_then_attach_again_is_rejected() {
        let (mut d, mut rx) = daemon();
        let first = d.execute("attach-session", Some(json!({"name": "a"}))).await;
        assert!(first.is_ok());
        let _ = rx.recv().await; // session-attached
        let second = d.execute("attach-session", Some(json!({"name": "a"}))).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn detach_unknown_session_is_rejected() {
        let (mut d, _rx) = daemon();
        let result = d.detach("ghost").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn list_sessions_reports_known_and_attached() {
        let (mut d, mut rx) = daemon();
        let _ = d.execute("attach-session", Some(json!({"name": "a"}))).await.unwrap();
        let _ = rx.recv().await; // session-attached
        let listed = d.execute("list-sessions", None).await.unwrap();
        assert_eq!(listed["all"], json!(["a"]));
        assert_eq!(listed["sessions"][0]["attached"], true);
    }
}
