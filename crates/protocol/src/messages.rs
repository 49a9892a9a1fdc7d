//! The wire schema. Field names here are contract — see spec §6 of the
//! design notes carried in the repository's `SPEC_FULL.md`. Everything is
//! plain JSON, one message per transport frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{CommandId, SessionId, ViewerId};

/// An AEAD ciphertext plus its nonce, both base64url (no padding).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub nonce: String,
    pub ciphertext: String,
}

/// A single rendered-pane snapshot, sequenced per session incarnation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputEvent {
    pub seq: u64,
    pub content: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Text,
    Special,
}

/// The plaintext a viewer's keystroke decrypts (or arrives as, in the
/// unencrypted path) to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputPayload {
    pub keys: String,
    #[serde(rename = "type")]
    pub kind: InputKind,
}

/// Summary row used by `active-sessions` (producer->relay, daemon mode)
/// and by the HTTP session directory listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonSessionSummary {
    pub session_id: SessionId,
    pub public_key: String,
    pub encrypted: bool,
    pub viewer_count: usize,
}

/// Summary row returned by `GET /api/sessions`, `GET /api/sessions/:id` and
/// `POST /api/user/sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub connected: bool,
    pub viewer_count: usize,
    pub last_seq: Option<u64>,
    pub encrypted: bool,
    pub locked: bool,
    pub created_at: u64,
}

// ─── Producer -> Relay ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
// see `ProducerOutbound` below for why this tags on `event`, not `type`.
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ProducerInbound {
    Output {
        seq: u64,
        content: String,
        timestamp: u64,
    },
    EncryptedOutput {
        viewer_id: ViewerId,
        encrypted: Envelope,
        seq: u64,
        timestamp: u64,
    },
    OutputHistory {
        encrypted: Envelope,
        seq: u64,
        timestamp: u64,
    },
    /// daemon mode only
    SessionAttached {
        session_id: SessionId,
        public_key: String,
        encrypted: bool,
    },
    /// daemon mode only
    SessionDetached { session_id: SessionId },
    /// daemon mode only
    ActiveSessions {
        sessions: Vec<DaemonSessionSummary>,
    },
    /// daemon mode only
    CliResponse {
        command_id: CommandId,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

// ─── Relay -> Producer ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
// `event` (not `type`) is the envelope discriminator. `Input` below also
// carries a contract field literally named `type` (the keystroke kind);
// an internally tagged enum can't reuse that key as both the variant tag
// and a struct field, so the tag moves to a name the payload never uses.
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ProducerOutbound {
    ViewerJoined {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        viewer_id: ViewerId,
        public_key: String,
    },
    ViewerLeft {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        viewer_id: ViewerId,
    },
    EncryptedInput {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        viewer_id: ViewerId,
        encrypted: Envelope,
    },
    /// unencrypted path
    Input {
        keys: String,
        #[serde(rename = "type")]
        kind: InputKind,
    },
    /// daemon mode only
    CliCommand {
        command_id: CommandId,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
}

// ─── Viewer -> Relay ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
// see `ProducerOutbound` above for why this tags on `event`, not `type`.
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ViewerInbound {
    Input {
        keys: String,
        #[serde(rename = "type")]
        kind: InputKind,
    },
    EncryptedInput { encrypted: Envelope },
    RequestControl,
    ReleaseControl,
    GetHistory,
}

// ─── Relay -> Viewer ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
// see `ProducerOutbound` above for why this tags on `event`, not `type`.
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ViewerOutbound {
    Output {
        seq: u64,
        content: String,
        timestamp: u64,
    },
    EncryptedOutput {
        encrypted: Envelope,
        seq: u64,
        timestamp: u64,
    },
    History { history: Vec<OutputEvent> },
    EncryptedHistory {
        history: Vec<EncryptedHistoryEntry>,
    },
    CliStatus {
        connected: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        public_key: Option<String>,
        encrypted: bool,
    },
    ControlStatus {
        locked: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        holder_id: Option<ViewerId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        holder_nickname: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        acquired_at: Option<u64>,
    },
    ControlDenied {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        holder_id: Option<ViewerId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        holder_nickname: Option<String>,
    },
    InputRejected { reason: String },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedHistoryEntry {
    pub encrypted: Envelope,
    pub seq: u64,
    pub timestamp: u64,
}

// ─── Daemon RPC (relay <-> HTTP caller, and relay <-> daemon) ──────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case", content = "params")]
pub enum DaemonCommand {
    ListSessions,
    CreateSession { name: String },
    AttachSession { name: String },
    DetachSession { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonCommandRequest {
    pub command_id: CommandId,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonCommandResponse {
    pub command_id: CommandId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The query-string handshake every WebSocket connection opens with.
/// `role` selects which of the three state machines (producer / daemon /
/// viewer) the connection joins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    pub role: ConnectionRole,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub user_secret: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionRole {
    Producer,
    Daemon,
    Viewer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_outbound_uses_contract_field_names() {
        let msg = ViewerOutbound::CliStatus {
            connected: true,
            public_key: Some("abc".into()),
            encrypted: true,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["event"], "cli-status");
        assert_eq!(json["publicKey"], "abc");
        assert_eq!(json["encrypted"], true);
    }

    #[test]
    fn producer_inbound_encrypted_output_round_trips() {
        let msg = ProducerInbound::EncryptedOutput {
            viewer_id: ViewerId::from("v1"),
            encrypted: Envelope {
                nonce: "n".into(),
                ciphertext: "c".into(),
            },
            seq: 7,
            timestamp: 1234,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"event\":\"encrypted-output\""));
        assert!(json.contains("\"viewerId\":\"v1\""));
        let back: ProducerInbound = serde_json::from_str(&json).unwrap();
        match back {
            ProducerInbound::EncryptedOutput { seq, .. } => assert_eq!(seq, 7),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn daemon_command_request_accepts_unknown_params_shape() {
        let raw = r#"{"commandId":"c1","command":"create-session","params":{"name":"x"}}"#;
        let req: DaemonCommandRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.command, "create-session");
        assert_eq!(req.params.unwrap()["name"], "x");
    }

    #[test]
    fn connect_query_parses_role_and_optional_fields() {
        let raw = r#"{"role":"viewer","sessionId":"demo","nickname":"a"}"#;
        let q: ConnectQuery = serde_json::from_str(raw).unwrap();
        assert_eq!(q.role, ConnectionRole::Viewer);
        assert_eq!(q.session_id.as_deref(), Some("demo"));
        assert!(q.public_key.is_none());
    }
}
