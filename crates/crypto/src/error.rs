use thiserror::Error;

/// Crypto faults never carry detail to a counterparty (spec §7: leaking the
/// reason is itself a side channel) — callers log these and drop the
/// message, they never `Display` one into an outgoing frame.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid base64 encoding")]
    Encoding,
    #[error("public key must be 32 bytes")]
    BadPublicKeyLength,
    #[error("envelope shorter than the nonce width")]
    ShortEnvelope,
    #[error("AEAD authentication failed")]
    AuthenticationFailed,
    #[error("decrypted bytes are not valid UTF-8")]
    NotUtf8,
    #[error("HKDF expand failed")]
    KeyDerivation,
    #[error("malformed pairing code")]
    MalformedPairingCode,
}
