//! Key material carried by clearance credentials.
//!
//! Credentials publish an X25519 encryption key (base64url) and a fingerprint
//! of that key. The fingerprint is the first 16 bytes of the Blake3 hash of
//! the raw key, hex encoded.

use std::fmt;

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, Result};

/// Number of hash bytes kept in a key fingerprint.
pub const FINGERPRINT_LEN: usize = 16;

/// Decode base64url, padded or not.
pub fn decode_base64url(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.trim();
    URL_SAFE_NO_PAD
        .decode(trimmed.trim_end_matches('='))
        .or_else(|_| URL_SAFE.decode(trimmed))
        .map_err(|e| CoreError::DecodingError(e.to_string()))
}

/// Encode as unpadded base64url.
pub fn encode_base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// An X25519 public key used to encrypt messages to a credential holder.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncryptionPublicKey(pub [u8; 32]);

impl EncryptionPublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a base64url-encoded key.
    pub fn from_base64url(encoded: &str) -> Result<Self> {
        let bytes = decode_base64url(encoded)
            .map_err(|e| CoreError::InvalidKey(e.to_string()))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            CoreError::InvalidKey(format!("expected 32 bytes, got {}", b.len()))
        })?;
        Ok(Self(arr))
    }

    /// Encode as unpadded base64url.
    pub fn to_base64url(&self) -> String {
        encode_base64url(&self.0)
    }

    /// Compute this key's fingerprint.
    pub fn fingerprint(&self) -> KeyFingerprint {
        KeyFingerprint::of(self)
    }
}

impl fmt::Debug for EncryptionPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionPublicKey({})", self.fingerprint())
    }
}

impl Serialize for EncryptionPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64url())
    }
}

impl<'de> Deserialize<'de> for EncryptionPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base64url(&s).map_err(serde::de::Error::custom)
    }
}

/// Short, human-comparable identifier of an encryption key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyFingerprint(String);

impl KeyFingerprint {
    /// Fingerprint a key.
    pub fn of(key: &EncryptionPublicKey) -> Self {
        let hash = blake3::hash(key.as_bytes());
        Self(hex::encode(&hash.as_bytes()[..FINGERPRINT_LEN]))
    }

    /// Wrap a fingerprint read from a credential, normalizing case.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let bytes = hex::decode(trimmed).map_err(|e| CoreError::InvalidKey(e.to_string()))?;
        if bytes.len() != FINGERPRINT_LEN {
            return Err(CoreError::InvalidKey(format!(
                "fingerprint must be {} bytes, got {}",
                FINGERPRINT_LEN,
                bytes.len()
            )));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// Whether this fingerprint was computed from `key`.
    pub fn matches(&self, key: &EncryptionPublicKey) -> bool {
        *self == Self::of(key)
    }

    /// Get the hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The key material extracted from a validated credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub public_key: EncryptionPublicKey,
    pub fingerprint: KeyFingerprint,
}

/// An issuer's Ed25519 verifying key, used to check JWS-signed credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuerVerifyingKey(pub ed25519_dalek::VerifyingKey);

impl IssuerVerifyingKey {
    /// Parse a base64url-encoded 32-byte Ed25519 key.
    pub fn from_base64url(encoded: &str) -> Result<Self> {
        let bytes = decode_base64url(encoded)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidKey("issuer key must be 32 bytes".into()))?;
        ed25519_dalek::VerifyingKey::from_bytes(&arr)
            .map(Self)
            .map_err(|e| CoreError::InvalidKey(e.to_string()))
    }

    /// Encode as unpadded base64url.
    pub fn to_base64url(&self) -> String {
        encode_base64url(self.0.as_bytes())
    }

    /// Verify an EdDSA signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        use ed25519_dalek::Verifier;
        let Ok(sig) = ed25519_dalek::Signature::from_slice(signature) else {
            return false;
        };
        self.0.verify(message, &sig).is_ok()
    }
}

impl Serialize for IssuerVerifyingKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64url())
    }
}

impl<'de> Deserialize<'de> for IssuerVerifyingKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base64url(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_base64url_roundtrip_and_padding() {
        let key = EncryptionPublicKey::from_bytes([7u8; 32]);
        let encoded = key.to_base64url();
        assert!(!encoded.contains('='));

        let padded = format!("{}=", encoded);
        assert_eq!(EncryptionPublicKey::from_base64url(&padded).unwrap(), key);
        assert_eq!(EncryptionPublicKey::from_base64url(&encoded).unwrap(), key);
    }

    #[test]
    fn test_public_key_wrong_length() {
        let encoded = encode_base64url(&[1u8; 16]);
        assert!(EncryptionPublicKey::from_base64url(&encoded).is_err());
    }

    #[test]
    fn test_fingerprint_matches_only_its_key() {
        let a = EncryptionPublicKey::from_bytes([1u8; 32]);
        let b = EncryptionPublicKey::from_bytes([2u8; 32]);
        let fp = a.fingerprint();

        assert_eq!(fp.as_str().len(), FINGERPRINT_LEN * 2);
        assert!(fp.matches(&a));
        assert!(!fp.matches(&b));
    }

    #[test]
    fn test_fingerprint_parse_is_case_insensitive() {
        let key = EncryptionPublicKey::from_bytes([9u8; 32]);
        let upper = key.fingerprint().as_str().to_ascii_uppercase();
        let parsed = KeyFingerprint::parse(&upper).unwrap();
        assert!(parsed.matches(&key));
        assert!(KeyFingerprint::parse("not-hex").is_err());
        assert!(KeyFingerprint::parse("abcd").is_err());
    }

    #[test]
    fn test_debug_does_not_print_key_bytes() {
        let key = EncryptionPublicKey::from_bytes([3u8; 32]);
        let debug = format!("{:?}", key);
        assert!(!debug.contains(&key.to_base64url()));
    }
}
