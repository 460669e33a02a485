//! Key agreement and key derivation.

use std::fmt;

use clearance_core::EncryptionPublicKey;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

/// Blake3 derive-key context for message keys.
const MESSAGE_KEY_CONTEXT: &str = "clearance-cipher-v1 message key";

/// A party's long-lived X25519 secret.
///
/// The matching public key is the one published in the party's clearance
/// credential.
#[derive(Clone)]
pub struct X25519StaticSecret(StaticSecret);

impl X25519StaticSecret {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(StaticSecret::from(bytes))
    }

    /// Create from seed bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Derive the public key.
    pub fn public_key(&self) -> EncryptionPublicKey {
        EncryptionPublicKey::from_bytes(*PublicKey::from(&self.0).as_bytes())
    }

    /// Whether `public` is this secret's public key.
    pub fn owns(&self, public: &EncryptionPublicKey) -> bool {
        self.public_key() == *public
    }

    /// Perform key agreement with a peer's public key.
    pub fn diffie_hellman(&self, peer_public: &EncryptionPublicKey) -> SharedKey {
        let shared = self.0.diffie_hellman(&PublicKey::from(*peer_public.as_bytes()));
        SharedKey(*shared.as_bytes())
    }
}

impl fmt::Debug for X25519StaticSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519StaticSecret(public={})", self.public_key().fingerprint())
    }
}

/// Raw X25519 output. Never used as a cipher key directly.
pub struct SharedKey([u8; 32]);

impl SharedKey {
    /// Derive the key for messages from `sender` to `recipient`.
    ///
    /// Both public keys enter the derivation in direction order, so the
    /// reverse direction between the same two parties gets a different key.
    pub fn message_key(
        &self,
        sender: &EncryptionPublicKey,
        recipient: &EncryptionPublicKey,
    ) -> MessageKey {
        let mut hasher = blake3::Hasher::new_derive_key(MESSAGE_KEY_CONTEXT);
        hasher.update(&self.0);
        hasher.update(sender.as_bytes());
        hasher.update(recipient.as_bytes());
        MessageKey(*hasher.finalize().as_bytes())
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

/// A 256-bit XChaCha20-Poly1305 key.
pub struct MessageKey([u8; 32]);

impl MessageKey {
    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MessageKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_agreement_is_symmetric() {
        let alice = X25519StaticSecret::generate();
        let bob = X25519StaticSecret::generate();

        let ab = alice.diffie_hellman(&bob.public_key());
        let ba = bob.diffie_hellman(&alice.public_key());
        assert_eq!(ab.0, ba.0);
    }

    #[test]
    fn test_direction_changes_message_key() {
        let alice = X25519StaticSecret::from_bytes([1u8; 32]);
        let bob = X25519StaticSecret::from_bytes([2u8; 32]);
        let shared = alice.diffie_hellman(&bob.public_key());

        let to_bob = shared.message_key(&alice.public_key(), &bob.public_key());
        let to_alice = shared.message_key(&bob.public_key(), &alice.public_key());
        assert_ne!(to_bob.as_bytes(), to_alice.as_bytes());
    }

    #[test]
    fn test_owns() {
        let alice = X25519StaticSecret::generate();
        let bob = X25519StaticSecret::generate();
        assert!(alice.owns(&alice.public_key()));
        assert!(!alice.owns(&bob.public_key()));
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = X25519StaticSecret::from_bytes([9u8; 32]);
        let debug = format!("{:?}", secret);
        assert!(debug.contains(secret.public_key().fingerprint().as_str()));
        assert!(!debug.contains("[9"));
    }
}
