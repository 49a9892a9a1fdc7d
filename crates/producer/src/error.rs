use thiserror::Error;

/// Typed failures from the producer-side controller. Crypto faults are
/// deliberately coarse here (see `termcast_crypto::CryptoError` for the
/// underlying reason) — spec §7 forbids reflecting decrypt detail anywhere,
/// including logs reachable by a viewer, so callers only need to know
/// "drop it" rather than why.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("pane capture failed: {0}")]
    Capture(String),
    #[error("key injection failed: {0}")]
    Inject(String),
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("session already exists: {0}")]
    SessionExists(String),
    #[error("session already attached: {0}")]
    AlreadyAttached(String),
    #[error("crypto error: {0}")]
    Crypto(#[from] termcast_crypto::CryptoError),
    #[error("relay connection closed")]
    ConnectionClosed,
}
