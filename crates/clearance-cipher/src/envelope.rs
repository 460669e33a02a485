//! Encrypted envelope wire format.
//!
//! On the wire an envelope is a camelCase JSON object with base64url binary
//! fields. It travels as a JSON string in the `content` of a [`ChatBody`].

use clearance_core::{ClearanceLevel, EncryptionPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cipher::SealedMessage;
use crate::error::{CipherError, Result};

/// Fields whose presence marks a JSON object as an encrypted envelope.
pub const ENVELOPE_FIELDS: [&str; 5] = [
    "ciphertext",
    "nonce",
    "senderPublicKey",
    "recipientPublicKey",
    "algorithm",
];

/// A sealed message plus its classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    #[serde(with = "base64url_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64url_bytes")]
    pub nonce: Vec<u8>,
    pub sender_public_key: EncryptionPublicKey,
    pub recipient_public_key: EncryptionPublicKey,
    pub algorithm: String,
    pub classification_label: String,
    pub classification_level: u8,
}

impl EncryptedEnvelope {
    /// Attach a classification to a sealed message.
    pub fn seal(sealed: SealedMessage, level: ClearanceLevel) -> Self {
        Self {
            ciphertext: sealed.ciphertext,
            nonce: sealed.nonce.to_vec(),
            sender_public_key: sealed.sender_public_key,
            recipient_public_key: sealed.recipient_public_key,
            algorithm: sealed.algorithm.to_string(),
            classification_label: level.label().to_string(),
            classification_level: level.ordinal(),
        }
    }

    /// The classification, read from the ordinal with the label as fallback.
    pub fn level(&self) -> Result<ClearanceLevel> {
        ClearanceLevel::from_ordinal(u64::from(self.classification_level))
            .or_else(|| self.classification_label.parse().ok())
            .ok_or_else(|| {
                CipherError::MalformedEnvelope(format!(
                    "unknown classification {} ({})",
                    self.classification_level, self.classification_label
                ))
            })
    }

    /// Whether a JSON value carries every envelope field.
    pub fn has_envelope_shape(value: &Value) -> bool {
        value
            .as_object()
            .map(|o| ENVELOPE_FIELDS.iter().all(|f| o.contains_key(*f)))
            .unwrap_or(false)
    }

    /// Parse from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| CipherError::MalformedEnvelope(e.to_string()))
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Placeholder shown in place of content that cannot be decrypted.
    pub fn placeholder(&self) -> String {
        format!(
            "[{} encrypted message, {} bytes]",
            self.classification_label,
            self.ciphertext.len()
        )
    }
}

/// Body of a basic chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatBody {
    /// Plaintext, or an [`EncryptedEnvelope`] as a JSON string.
    pub content: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl ChatBody {
    /// A plaintext body.
    pub fn plain(content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            content: content.into(),
            timestamp,
        }
    }

    /// A body carrying an encrypted envelope.
    pub fn encrypted(envelope: &EncryptedEnvelope, timestamp: i64) -> Result<Self> {
        Ok(Self {
            content: envelope.to_json()?,
            timestamp,
        })
    }

    /// Parse a message body. `None` if it is not a chat body at all.
    pub fn from_value(body: &Value) -> Option<Self> {
        serde_json::from_value(body.clone()).ok()
    }

    /// The content as an envelope-shaped JSON value, if it is one.
    pub fn envelope_value(&self) -> Option<Value> {
        let value: Value = serde_json::from_str(&self.content).ok()?;
        EncryptedEnvelope::has_envelope_shape(&value).then_some(value)
    }

    /// Convert to a JSON message body.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "content": self.content,
            "timestamp": self.timestamp,
        })
    }
}

mod base64url_bytes {
    use clearance_core::{decode_base64url, encode_base64url};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode_base64url(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode_base64url(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{decrypt, encrypt};
    use crate::keys::X25519StaticSecret;
    use serde_json::json;

    fn sample(level: ClearanceLevel) -> (EncryptedEnvelope, X25519StaticSecret) {
        let alice = X25519StaticSecret::generate();
        let bob = X25519StaticSecret::generate();
        let sealed = encrypt(b"hello", &alice, &alice.public_key(), &bob.public_key()).unwrap();
        (EncryptedEnvelope::seal(sealed, level), bob)
    }

    #[test]
    fn test_wire_shape_is_camel_case() {
        let (env, _) = sample(ClearanceLevel::Confidential);
        let value = serde_json::to_value(&env).unwrap();

        assert!(EncryptedEnvelope::has_envelope_shape(&value));
        assert_eq!(value["classificationLabel"], "CONFIDENTIAL");
        assert_eq!(value["classificationLevel"], 2);
        assert!(value["ciphertext"].is_string());
    }

    #[test]
    fn test_chat_body_nests_envelope_as_string() {
        let (env, bob) = sample(ClearanceLevel::Secret);
        let body = ChatBody::encrypted(&env, 1_700_000_000_000).unwrap();
        let value = body.to_value();
        assert!(value["content"].is_string());

        let parsed = ChatBody::from_value(&value).unwrap();
        let env_value = parsed.envelope_value().unwrap();
        let back: EncryptedEnvelope = serde_json::from_value(env_value).unwrap();
        assert_eq!(back, env);
        assert_eq!(decrypt(&back, &bob).unwrap(), b"hello");
    }

    #[test]
    fn test_plain_body_has_no_envelope() {
        let body = ChatBody::plain("just text", 0);
        assert!(body.envelope_value().is_none());

        let json_but_not_envelope = ChatBody::plain(r#"{"ciphertext": "abc"}"#, 0);
        assert!(json_but_not_envelope.envelope_value().is_none());
    }

    #[test]
    fn test_level_falls_back_to_label() {
        let (mut env, _) = sample(ClearanceLevel::TopSecret);
        assert_eq!(env.level().unwrap(), ClearanceLevel::TopSecret);

        env.classification_level = 99;
        env.classification_label = "RESTRICTED".into();
        assert_eq!(env.level().unwrap(), ClearanceLevel::Secret);

        env.classification_label = "COSMIC".into();
        assert!(env.level().is_err());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            EncryptedEnvelope::from_json("{\"ciphertext\": 5}"),
            Err(CipherError::MalformedEnvelope(_))
        ));
        assert!(ChatBody::from_value(&json!({"text": "no content field"})).is_none());
    }
}
