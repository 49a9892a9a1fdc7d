//! Key agreement, AEAD envelopes, and pairing codes for termcast (spec
//! §4.3). Deliberately thin: the primitives are audited third-party crates,
//! this module only wires them together the way the protocol requires.

pub mod error;
pub mod keys;
pub mod pairing;

pub use error::CryptoError;
pub use keys::{KeyPair, SharedSecret};
pub use pairing::PairingCode;
