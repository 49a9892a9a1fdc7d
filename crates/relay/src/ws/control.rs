//! Control-lock arbitration (spec §4.1 "Input routing & control lock").
//! Pure state-machine functions over `&mut Session` so they can be unit
//! tested without a socket in the loop.

use std::time::{Duration, Instant};

use termcast_protocol::{ViewerId, ViewerOutbound, CONTROL_LOCK_IDLE_SECS};

use crate::model::{now_ms, ControlLock, Session};

fn idle_timeout() -> Duration {
    Duration::from_secs(CONTROL_LOCK_IDLE_SECS)
}

/// Outcome of a gated input message, dictating what the caller should do
/// with it next.
pub enum GateOutcome {
    /// Forward it to the producer.
    Forward,
    /// Reject: reply to the sender only, drop the message.
    Rejected,
}

/// Gates viewer input against the control lock (spec §4.1 steps 1-3).
/// Mutates `lastInputAt` on the holder's own input and clears an idle lock
/// before falling through, exactly as specified.
///
/// The returned `Option<ViewerOutbound>` is only ever populated on the
/// `Forward` outcome (the idle-expiry `ControlStatus` broadcast to every
/// viewer) — a `Rejected` outcome carries no message of its own; the caller
/// builds `InputRejected` and sends it solely to `sender`.
pub fn gate_input(session: &mut Session, sender: &ViewerId) -> (GateOutcome, Option<ViewerOutbound>) {
    let Some(lock) = session.control_lock.as_mut() else {
        return (GateOutcome::Forward, None);
    };

    if &lock.holder_id == sender {
        lock.last_input_at = Instant::now();
        return (GateOutcome::Forward, None);
    }

    if !lock.is_idle(idle_timeout()) {
        return (GateOutcome::Rejected, None);
    }

    // Idle expiry: clear and broadcast, then fall through and permit.
    session.control_lock = None;
    (
        GateOutcome::Forward,
        Some(ViewerOutbound::ControlStatus {
            locked: false,
            holder_id: None,
            holder_nickname: None,
            acquired_at: None,
        }),
    )
}

pub enum RequestOutcome {
    Granted(ViewerOutbound),
    Denied(ViewerOutbound),
}

/// `request-control` (spec §4.1): grant if unheld, idle, or already held by
/// the requester; otherwise deny to the requester only.
pub fn request_control(
    session: &mut Session,
    requester: ViewerId,
    requester_nickname: Option<String>,
) -> RequestOutcome {
    let already_holds = session
        .control_lock
        .as_ref()
        .map(|lock| lock.holder_id == requester)
        .unwrap_or(false);
    let idle = session
        .control_lock
        .as_ref()
        .map(|lock| lock.is_idle(idle_timeout()))
        .unwrap_or(true);

    if already_holds || idle {
        let now = Instant::now();
        let acquired_at_ms = now_ms();
        session.control_lock = Some(ControlLock {
            holder_id: requester.clone(),
            holder_nickname: requester_nickname.clone(),
            acquired_at_ms,
            last_input_at: now,
        });
        RequestOutcome::Granted(ViewerOutbound::ControlStatus {
            locked: true,
            holder_id: Some(requester),
            holder_nickname: requester_nickname,
            acquired_at: Some(acquired_at_ms),
        })
    } else {
        let lock = session.control_lock.as_ref().expect("checked above");
        RequestOutcome::Denied(ViewerOutbound::ControlDenied {
            reason: "locked".into(),
            holder_id: Some(lock.holder_id.clone()),
            holder_nickname: lock.holder_nickname.clone(),
        })
    }
}

/// `release-control`: only the current holder may release.
pub fn release_control(session: &mut Session, requester: &ViewerId) -> Option<ViewerOutbound> {
    let holds = session
        .control_lock
        .as_ref()
        .map(|lock| &lock.holder_id == requester)
        .unwrap_or(false);
    if !holds {
        return None;
    }
    session.control_lock = None;
    Some(ViewerOutbound::ControlStatus {
        locked: false,
        holder_id: None,
        holder_nickname: None,
        acquired_at: None,
    })
}

/// Clears the lock if `viewer_id` held it (spec §4.1 "Viewer termination").
pub fn clear_if_holder(session: &mut Session, viewer_id: &ViewerId) -> Option<ViewerOutbound> {
    let holds = session
        .control_lock
        .as_ref()
        .map(|lock| &lock.holder_id == viewer_id)
        .unwrap_or(false);
    if !holds {
        return None;
    }
    session.control_lock = None;
    Some(ViewerOutbound::ControlStatus {
        locked: false,
        holder_id: None,
        holder_nickname: None,
        acquired_at: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use termcast_protocol::SessionId;

    fn session() -> Session {
        Session::new(SessionId::from("s"), None)
    }

    #[test]
    fn unheld_lock_permits_unconditionally() {
        let mut s = session();
        let (outcome, _) = gate_input(&mut s, &ViewerId::from("a"));
        assert!(matches!(outcome, GateOutcome::Forward));
    }

    #[test]
    fn holder_input_updates_last_input_at() {
        let mut s = session();
        match request_control(&mut s, ViewerId::from("a"), None) {
            RequestOutcome::Granted(_) => {}
            _ => panic!("expected grant"),
        }
        let before = s.control_lock.as_ref().unwrap().last_input_at;
        std::thread::sleep(Duration::from_millis(5));
        let (outcome, _) = gate_input(&mut s, &ViewerId::from("a"));
        assert!(matches!(outcome, GateOutcome::Forward));
        assert!(s.control_lock.as_ref().unwrap().last_input_at > before);
    }

    #[test]
    fn non_holder_input_rejected_while_fresh() {
        let mut s = session();
        request_control(&mut s, ViewerId::from("a"), None);
        let (outcome, msg) = gate_input(&mut s, &ViewerId::from("b"));
        assert!(matches!(outcome, GateOutcome::Rejected));
        assert!(msg.is_none());
    }

    #[test]
    fn second_request_while_locked_and_fresh_is_denied() {
        let mut s = session();
        request_control(&mut s, ViewerId::from("a"), None);
        match request_control(&mut s, ViewerId::from("b"), None) {
            RequestOutcome::Denied(ViewerOutbound::ControlDenied { holder_id, .. }) => {
                assert_eq!(holder_id, Some(ViewerId::from("a")));
            }
            _ => panic!("expected denial"),
        }
    }

    #[test]
    fn only_holder_may_release() {
        let mut s = session();
        request_control(&mut s, ViewerId::from("a"), None);
        assert!(release_control(&mut s, &ViewerId::from("b")).is_none());
        assert!(s.control_lock.is_some());
        assert!(release_control(&mut s, &ViewerId::from("a")).is_some());
        assert!(s.control_lock.is_none());
    }
}
