//! The explicit broker object every handler (WebSocket or HTTP) shares
//! (spec §9 design note: "ambient global state becomes an explicit broker
//! object"). Holds the session table, the daemon registry, and a
//! `viewerId -> sessionId` index used to route daemon-multiplexed
//! `encrypted-output`/`output-history` messages without a session id on
//! the wire (see `DESIGN.md` for why that index exists).

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot, Mutex};

use termcast_protocol::{
    CommandId, DaemonCommandResponse, DaemonId, ProducerOutbound, SessionId, SessionSummary,
    UserId, ViewerId,
};

use crate::error::RelayError;
use crate::model::Session;

/// One connected daemon: its outbound channel (shared by every session it
/// currently has attached) and the RPC calls awaiting a `cli-response`.
pub struct DaemonHandle {
    pub user_id: Option<UserId>,
    pub outbound: mpsc::UnboundedSender<ProducerOutbound>,
    pub active_session_ids: Mutex<Vec<SessionId>>,
    pending: DashMap<CommandId, oneshot::Sender<DaemonCommandResponse>>,
}

impl DaemonHandle {
    pub fn new(user_id: Option<UserId>, outbound: mpsc::UnboundedSender<ProducerOutbound>) -> Self {
        DaemonHandle {
            user_id,
            outbound,
            active_session_ids: Mutex::new(Vec::new()),
            pending: DashMap::new(),
        }
    }

    pub fn register_pending(&self, id: CommandId, tx: oneshot::Sender<DaemonCommandResponse>) {
        self.pending.insert(id, tx);
    }

    /// Delivers a `cli-response` to whoever is waiting on this command, if
    /// anyone still is (the HTTP caller may have timed out already).
    pub fn resolve(&self, response: DaemonCommandResponse) {
        if let Some((_, tx)) = self.pending.remove(&response.command_id) {
            let _ = tx.send(response);
        }
    }

    pub fn abandon(&self, id: &CommandId) {
        self.pending.remove(id);
    }
}

/// Hashes a viewer/producer-supplied `userSecret` into a stable, opaque
/// `UserId`. Deterministic and non-failing — spec §4.1: "ownership is
/// asserted only at registration, not verified cryptographically."
pub fn derive_user_id(secret: &str) -> UserId {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    let digest = hasher.finalize();
    UserId::from(hex_encode(&digest))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

#[derive(Default)]
pub struct SessionDirectory {
    sessions: DashMap<SessionId, Arc<Mutex<Session>>>,
    daemons: DashMap<DaemonId, Arc<DaemonHandle>>,
    viewer_index: DashMap<ViewerId, SessionId>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    /// Creates the session on first producer/viewer for a `sessionId`
    /// (spec §4.1 "Session creation"). `user_id` is only ever supplied by
    /// the producer path — a viewer creating a session ahead of its
    /// producer never sets ownership.
    pub fn get_or_create(&self, session_id: SessionId, user_id: Option<UserId>) -> Arc<Mutex<Session>> {
        self.sessions
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(session_id, user_id))))
            .clone()
    }

    pub fn remove_if_still_empty(&self, session_id: &SessionId, since: Instant) -> bool {
        if let Some(entry) = self.sessions.get(session_id) {
            let session = entry.clone();
            drop(entry);
            let guard = session.try_lock();
            let should_remove = match guard {
                Ok(session) => session.is_empty() && session.empty_since == Some(since),
                Err(_) => false,
            };
            if should_remove {
                self.sessions.remove(session_id);
                return true;
            }
        }
        false
    }

    pub fn link_viewer(&self, viewer_id: ViewerId, session_id: SessionId) {
        self.viewer_index.insert(viewer_id, session_id);
    }

    pub fn unlink_viewer(&self, viewer_id: &ViewerId) {
        self.viewer_index.remove(viewer_id);
    }

    pub fn session_for_viewer(&self, viewer_id: &ViewerId) -> Option<Arc<Mutex<Session>>> {
        let session_id = self.viewer_index.get(viewer_id)?.clone();
        self.get(&session_id)
    }

    pub fn register_daemon(&self, daemon_id: DaemonId, handle: Arc<DaemonHandle>) {
        self.daemons.insert(daemon_id, handle);
    }

    pub fn unregister_daemon(&self, daemon_id: &DaemonId) {
        self.daemons.remove(daemon_id);
    }

    /// Picks "the first available daemon" (spec §4.1 daemon RPC dispatch —
    /// the source protocol never specified a load-balancing policy beyond
    /// this, see `DESIGN.md`).
    pub fn any_daemon(&self) -> Option<Arc<DaemonHandle>> {
        self.daemons.iter().next().map(|entry| entry.value().clone())
    }

    /// Every session whose `userId` matches the hash of `user_secret`,
    /// newest first (spec §4.1 "Session enumeration").
    pub async fn sessions_for_user(&self, user_id: &UserId) -> Vec<(SessionId, Arc<Mutex<Session>>)> {
        let mut matches = Vec::new();
        for entry in self.sessions.iter() {
            let session = entry.value().clone();
            let owned = {
                let guard = session.lock().await;
                guard.user_id.as_ref() == Some(user_id)
            };
            if owned {
                matches.push((entry.key().clone(), session));
            }
        }
        let mut with_ts = Vec::with_capacity(matches.len());
        for (id, session) in matches {
            let created_at_ms = session.lock().await.created_at_ms;
            with_ts.push((created_at_ms, id, session));
        }
        with_ts.sort_by(|a, b| b.0.cmp(&a.0));
        with_ts.into_iter().map(|(_, id, session)| (id, session)).collect()
    }

    pub async fn summarize(&self, session_id: &SessionId) -> Option<SessionSummary> {
        let session = self.get(session_id)?;
        let guard = session.lock().await;
        Some(summarize_locked(&guard))
    }

    pub async fn list_summaries(&self) -> Vec<SessionSummary> {
        let mut out = Vec::with_capacity(self.sessions.len());
        for entry in self.sessions.iter() {
            let guard = entry.value().lock().await;
            out.push(summarize_locked(&guard));
        }
        out
    }

    pub async fn dispatch_daemon_command(
        &self,
        command: String,
        params: Option<serde_json::Value>,
        command_id: CommandId,
    ) -> Result<DaemonCommandResponse, RelayError> {
        let daemon = self.any_daemon().ok_or(RelayError::NoDaemonConnected)?;
        let (tx, rx) = oneshot::channel();
        daemon.register_pending(command_id.clone(), tx);

        let msg = ProducerOutbound::CliCommand {
            command_id: command_id.clone(),
            command,
            params,
        };
        if daemon.outbound.send(msg).is_err() {
            daemon.abandon(&command_id);
            return Err(RelayError::NoDaemonConnected);
        }

        match tokio::time::timeout(
            std::time::Duration::from_secs(termcast_protocol::DAEMON_RPC_TIMEOUT_SECS),
            rx,
        )
        .await
        {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RelayError::NoDaemonConnected),
            Err(_) => {
                daemon.abandon(&command_id);
                Err(RelayError::CommandTimeout)
            }
        }
    }
}

fn summarize_locked(session: &Session) -> SessionSummary {
    SessionSummary {
        session_id: session.session_id.clone(),
        connected: session.producer.is_some(),
        viewer_count: session.viewers.len(),
        last_seq: session.last_seq(),
        encrypted: session.encrypted,
        locked: session.control_lock.is_some(),
        created_at: session.created_at_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_user_id_is_deterministic() {
        let a = derive_user_id("swordfish");
        let b = derive_user_id("swordfish");
        let c = derive_user_id("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn get_or_create_reuses_existing_session() {
        let dir = SessionDirectory::new();
        let id = SessionId::from("demo");
        let first = dir.get_or_create(id.clone(), None);
        let second = dir.get_or_create(id.clone(), None);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn sessions_for_user_filters_by_owner() {
        let dir = SessionDirectory::new();
        let owner = derive_user_id("s");
        dir.get_or_create(SessionId::from("a"), Some(owner.clone()));
        dir.get_or_create(SessionId::from("b"), Some(owner.clone()));
        dir.get_or_create(SessionId::from("c"), Some(derive_user_id("other")));

        let mine = dir.sessions_for_user(&owner).await;
        assert_eq!(mine.len(), 2);
    }

    #[tokio::test]
    async fn viewer_index_round_trips() {
        let dir = SessionDirectory::new();
        let session_id = SessionId::from("demo");
        dir.get_or_create(session_id.clone(), None);
        let viewer_id = ViewerId::from("v1");
        dir.link_viewer(viewer_id.clone(), session_id.clone());
        assert!(dir.session_for_viewer(&viewer_id).is_some());
        dir.unlink_viewer(&viewer_id);
        assert!(dir.session_for_viewer(&viewer_id).is_none());
    }
}
