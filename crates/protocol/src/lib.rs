//! Wire schema shared by the termcast relay and producer. Kept dependency
//! free beyond `serde`/`serde_json` so either side can pull it in without
//! pulling in the other's transport or crypto stack.

pub mod ids;
pub mod messages;

pub use ids::{CommandId, DaemonId, SessionId, UserId, ViewerId};
pub use messages::*;

/// Ring buffers never exceed this many entries (spec: `outputHistory` and
/// `encryptedHistory` are both bounded at 100).
pub const HISTORY_CAPACITY: usize = 100;

/// Control lock idle timeout, measured from `lastInputAt`.
pub const CONTROL_LOCK_IDLE_SECS: u64 = 30;

/// Grace period before an empty session (no producer, no viewers) is reaped.
pub const EMPTY_SESSION_GRACE_SECS: u64 = 60;

/// Daemon RPC dispatch timeout.
pub const DAEMON_RPC_TIMEOUT_SECS: u64 = 10;

/// Default producer capture poll interval.
pub const DEFAULT_CAPTURE_POLL_MS: u64 = 100;
