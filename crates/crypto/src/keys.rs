//! X25519 key agreement -> HKDF-SHA256 -> XChaCha20-Poly1305 envelopes.
//!
//! Grounded in the same DH/HKDF/AEAD stack used for relay E2E sessions
//! elsewhere in this domain: `x25519-dalek` for the curve, `hkdf`+`sha2`
//! for key derivation, `chacha20poly1305` for the AEAD. We use the XChaCha
//! variant (24-byte nonce) rather than plain ChaCha20-Poly1305 (12-byte
//! nonce) because a `SharedSecret` here is long-lived (the lifetime of a
//! viewer's presence in a session) and carries traffic in both directions
//! without a shared counter, so fresh-random nonces are the only safe
//! choice — XChaCha's wider nonce makes random sampling collision-free in
//! practice for the lifetime of one session.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::CryptoError;
use termcast_protocol::Envelope;

const HKDF_INFO: &[u8] = b"termcast-envelope-v1";

/// A key pair scoped to one session incarnation (producer) or one
/// connection (viewer). Producers reuse theirs across every paired viewer;
/// viewers use theirs exactly once, for the DH against the producer.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        KeyPair { secret, public }
    }

    pub fn public_key_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.public.as_bytes())
    }

    /// Derive the shared secret with a peer's base64url-encoded public key.
    pub fn derive_shared(&self, peer_public_b64: &str) -> Result<SharedSecret, CryptoError> {
        let peer = decode_public_key(peer_public_b64)?;
        let dh = self.secret.diffie_hellman(&peer);
        SharedSecret::from_dh_output(dh.as_bytes())
    }
}

fn decode_public_key(b64: &str) -> Result<PublicKey, CryptoError> {
    let raw = URL_SAFE_NO_PAD
        .decode(b64)
        .map_err(|_| CryptoError::Encoding)?;
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| CryptoError::BadPublicKeyLength)?;
    Ok(PublicKey::from(bytes))
}

/// A symmetric key derived once per (session, viewer) pair. Lives as long
/// as the viewer is present in the session.
pub struct SharedSecret {
    cipher: XChaCha20Poly1305,
}

impl SharedSecret {
    fn from_dh_output(ikm: &[u8]) -> Result<Self, CryptoError> {
        let hk = Hkdf::<Sha256>::new(None, ikm);
        let mut okm = [0u8; 32];
        hk.expand(HKDF_INFO, &mut okm)
            .map_err(|_| CryptoError::KeyDerivation)?;
        let cipher = XChaCha20Poly1305::new((&okm).into());
        Ok(SharedSecret { cipher })
    }

    /// Encrypt `plaintext` under a fresh random 24-byte nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Envelope, CryptoError> {
        let mut nonce_bytes = [0u8; 24];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::AuthenticationFailed)?;
        Ok(Envelope {
            nonce: URL_SAFE_NO_PAD.encode(nonce_bytes),
            ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
        })
    }

    pub fn encrypt_json<T: serde::Serialize>(&self, value: &T) -> Result<Envelope, CryptoError> {
        let bytes = serde_json::to_vec(value).map_err(|_| CryptoError::Encoding)?;
        self.encrypt(&bytes)
    }

    /// Decrypt an envelope. Returns `Err` (never panics) on a bad nonce
    /// length, base64, or failed authentication tag — callers must drop the
    /// message on any error rather than reflect it to the sender.
    pub fn decrypt(&self, envelope: &Envelope) -> Result<Vec<u8>, CryptoError> {
        let nonce_bytes = URL_SAFE_NO_PAD
            .decode(&envelope.nonce)
            .map_err(|_| CryptoError::Encoding)?;
        if nonce_bytes.len() != 24 {
            return Err(CryptoError::ShortEnvelope);
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(&envelope.ciphertext)
            .map_err(|_| CryptoError::Encoding)?;
        let nonce = XNonce::from_slice(&nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|_| CryptoError::AuthenticationFailed)
    }

    pub fn decrypt_json<T: serde::de::DeserializeOwned>(
        &self,
        envelope: &Envelope,
    ) -> Result<T, CryptoError> {
        let bytes = self.decrypt(envelope)?;
        serde_json::from_slice(&bytes).map_err(|_| CryptoError::Encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_dh_and_aead() {
        let producer = KeyPair::generate();
        let viewer = KeyPair::generate();

        let producer_secret = producer.derive_shared(&viewer.public_key_base64()).unwrap();
        let viewer_secret = viewer.derive_shared(&producer.public_key_base64()).unwrap();

        let envelope = producer_secret.encrypt(b"hello\n").unwrap();
        let plaintext = viewer_secret.decrypt(&envelope).unwrap();
        assert_eq!(plaintext, b"hello\n");
    }

    #[test]
    fn decrypt_fails_under_wrong_shared_secret() {
        let producer = KeyPair::generate();
        let viewer = KeyPair::generate();
        let intruder = KeyPair::generate();

        let producer_secret = producer.derive_shared(&viewer.public_key_base64()).unwrap();
        let intruder_secret = intruder.derive_shared(&producer.public_key_base64()).unwrap();

        let envelope = producer_secret.encrypt(b"secret frame").unwrap();
        assert!(intruder_secret.decrypt(&envelope).is_err());
    }

    #[test]
    fn successive_encryptions_use_distinct_nonces() {
        let producer = KeyPair::generate();
        let viewer = KeyPair::generate();
        let secret = producer.derive_shared(&viewer.public_key_base64()).unwrap();

        let a = secret.encrypt(b"same content").unwrap();
        let b = secret.encrypt(b"same content").unwrap();
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn rejects_malformed_public_key() {
        let kp = KeyPair::generate();
        assert!(kp.derive_shared("not-valid-base64!!").is_err());
    }
}
