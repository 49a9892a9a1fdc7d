//! In-memory domain types the relay owns. The relay exclusively owns
//! `Session` and `Viewer` records (spec §3 "Ownership"); producers and
//! viewers only ever observe this state through messages.

use std::collections::{HashMap, VecDeque};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use termcast_protocol::{
    EncryptedHistoryEntry, OutputEvent, ProducerOutbound, SessionId, UserId, ViewerId,
    ViewerOutbound, HISTORY_CAPACITY,
};

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX_EPOCH")
        .as_millis() as u64
}

/// Identifies one physical connection, so a session can tell whether a
/// disconnecting producer is the one currently bound (and not a stale
/// connection that has since been replaced).
pub type ConnectionToken = uuid::Uuid;

pub struct ProducerBinding {
    pub connection: ConnectionToken,
    pub public_key: Option<String>,
    pub outbound: mpsc::UnboundedSender<ProducerOutbound>,
    /// A new binding cancels this before replacing the binding, so the
    /// prior connection's socket task wakes up and closes immediately
    /// (spec §3: "replacement closes the prior binding").
    pub cancel: CancellationToken,
    /// `Some` only for daemon connections, where one physical connection
    /// multiplexes many sessions and outbound messages must carry the
    /// session id so the daemon knows which one they're about.
    pub wire_session_id: Option<SessionId>,
}

impl ProducerBinding {
    /// Messages to a daemon-bound producer must carry `sessionId` so the
    /// multiplexed process knows which of its sessions they're about
    /// (spec §6: "sessionId present in daemon mode"); a single-session
    /// producer already knows from the one connection it opened.
    pub fn session_tag(&self, session_id: &SessionId) -> Option<SessionId> {
        self.wire_session_id.as_ref().map(|_| session_id.clone())
    }
}

pub struct ViewerBinding {
    pub public_key: Option<String>,
    pub nickname: Option<String>,
    pub outbound: mpsc::UnboundedSender<ViewerOutbound>,
}

/// The single-writer control token (spec §3 `ControlLock`). Idle timeout is
/// evaluated lazily against `last_input_at` — no background sweep, per the
/// design note in spec §9.
pub struct ControlLock {
    pub holder_id: ViewerId,
    pub holder_nickname: Option<String>,
    pub acquired_at_ms: u64,
    pub last_input_at: Instant,
}

impl ControlLock {
    pub fn is_idle(&self, idle_timeout: std::time::Duration) -> bool {
        self.last_input_at.elapsed() >= idle_timeout
    }
}

pub struct Session {
    pub session_id: SessionId,
    pub user_id: Option<UserId>,
    pub producer: Option<ProducerBinding>,
    pub viewers: HashMap<ViewerId, ViewerBinding>,
    pub last_output: Option<OutputEvent>,
    pub output_history: VecDeque<OutputEvent>,
    pub encrypted_history: VecDeque<EncryptedHistoryEntry>,
    pub encrypted: bool,
    pub control_lock: Option<ControlLock>,
    pub created_at_ms: u64,
    /// Set once a disconnect leaves the session empty; cleared if someone
    /// (re)joins before the reaper fires. Lets a stale reaper task no-op
    /// instead of deleting a session that came back to life.
    pub empty_since: Option<Instant>,
    /// Latest sequence number observed on either path (plaintext or
    /// encrypted) — used for session-enumeration summaries, since the
    /// encrypted path never populates `last_output`.
    pub last_seq_seen: Option<u64>,
}

impl Session {
    pub fn new(session_id: SessionId, user_id: Option<UserId>) -> Self {
        Session {
            session_id,
            user_id,
            producer: None,
            viewers: HashMap::new(),
            last_output: None,
            output_history: VecDeque::with_capacity(HISTORY_CAPACITY),
            encrypted_history: VecDeque::with_capacity(HISTORY_CAPACITY),
            encrypted: false,
            control_lock: None,
            created_at_ms: now_ms(),
            empty_since: None,
            last_seq_seen: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.producer.is_none() && self.viewers.is_empty()
    }

    pub fn push_output_history(&mut self, event: OutputEvent) {
        if self.output_history.len() >= HISTORY_CAPACITY {
            self.output_history.pop_front();
        }
        self.output_history.push_back(event);
    }

    pub fn push_encrypted_history(&mut self, entry: EncryptedHistoryEntry) {
        if self.encrypted_history.len() >= HISTORY_CAPACITY {
            self.encrypted_history.pop_front();
        }
        self.encrypted_history.push_back(entry);
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq_seen
    }

    pub fn broadcast_to_viewers(&self, msg: &ViewerOutbound) {
        for viewer in self.viewers.values() {
            let _ = viewer.outbound.send(msg.clone());
        }
    }

    pub fn broadcast_to_viewers_except(&self, except: &ViewerId, msg: &ViewerOutbound) {
        for (id, viewer) in &self.viewers {
            if id != except {
                let _ = viewer.outbound.send(msg.clone());
            }
        }
    }

    pub fn notify_producer(&self, msg: ProducerOutbound) -> bool {
        match &self.producer {
            Some(p) => p.outbound.send(msg).is_ok(),
            None => false,
        }
    }
}
