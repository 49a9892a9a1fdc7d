use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("connection handshake missing sessionId")]
    MissingSessionId,
    #[error("unknown connection role")]
    UnknownRole,
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("no CLI daemon connected")]
    NoDaemonConnected,
    #[error("daemon command timed out")]
    CommandTimeout,
    #[error("daemon reported failure: {0}")]
    DaemonFailure(String),
}
