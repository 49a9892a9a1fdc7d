//! Out-of-band pairing codes: `{sessionId, publicKey, timestamp}` packed
//! into one URL-safe token a viewer can receive outside the relay
//! connection (QR code, copy-paste link — both excluded from scope here,
//! see spec §1).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingCode {
    pub session_id: String,
    pub public_key: String,
    pub timestamp: u64,
}

impl PairingCode {
    pub fn new(session_id: impl Into<String>, public_key: impl Into<String>, timestamp: u64) -> Self {
        PairingCode {
            session_id: session_id.into(),
            public_key: public_key.into(),
            timestamp,
        }
    }

    /// Serializes to JSON then base64url-encodes the result into one token.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("PairingCode always serializes");
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Valid iff all three fields are present, per spec §4.3.
    pub fn decode(token: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CryptoError::MalformedPairingCode)?;
        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|_| CryptoError::MalformedPairingCode)?;
        let obj = value.as_object().ok_or(CryptoError::MalformedPairingCode)?;
        if !obj.contains_key("sessionId")
            || !obj.contains_key("publicKey")
            || !obj.contains_key("timestamp")
        {
            return Err(CryptoError::MalformedPairingCode);
        }
        serde_json::from_value(value).map_err(|_| CryptoError::MalformedPairingCode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let code = PairingCode::new("demo", "pubkey-b64", 1_700_000_000_000);
        let token = code.encode();
        let decoded = PairingCode::decode(&token).unwrap();
        assert_eq!(decoded.session_id, "demo");
        assert_eq!(decoded.public_key, "pubkey-b64");
        assert_eq!(decoded.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn rejects_missing_field() {
        let json = r#"{"sessionId":"demo","publicKey":"x"}"#;
        let token = URL_SAFE_NO_PAD.encode(json.as_bytes());
        assert!(PairingCode::decode(&token).is_err());
    }

    #[test]
    fn rejects_garbage_token() {
        assert!(PairingCode::decode("not-base64!!!").is_err());
    }
}
