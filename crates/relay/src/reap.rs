//! Empty-session reaping (spec §4.1 "Empty session reaping", §5 timers).
//! 60 seconds after a disconnect leaves a session with no producer and no
//! viewers, it is deleted — unless someone rejoined in the meantime.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use termcast_protocol::{SessionId, EMPTY_SESSION_GRACE_SECS};

use crate::directory::SessionDirectory;
use crate::model::Session;

/// Marks `session` as empty as of now and, if it is still empty after the
/// grace period, removes it from the directory. Call this every time a
/// disconnect leaves a session with no producer and no viewers; a session
/// that comes back to life clears `empty_since` and the stale reaper's
/// check simply no-ops.
pub fn schedule(directory: Arc<SessionDirectory>, session_id: SessionId, session: Arc<Mutex<Session>>) {
    tokio::spawn(async move {
        let since = Instant::now();
        {
            let mut guard = session.lock().await;
            if !guard.is_empty() {
                return;
            }
            guard.empty_since = Some(since);
        }

        tokio::time::sleep(Duration::from_secs(EMPTY_SESSION_GRACE_SECS)).await;

        if directory.remove_if_still_empty(&session_id, since) {
            debug!(session_id = %session_id, "reaped empty session");
        }
    });
}
