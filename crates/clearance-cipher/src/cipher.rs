//! Sealing and opening messages.
//!
//! `X25519(sender, recipient)` gives a shared secret, Blake3 derives a
//! direction-bound message key from it, and XChaCha20-Poly1305 encrypts with
//! a fresh random 24-byte nonce per message.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use clearance_core::EncryptionPublicKey;
use rand::RngCore;

use crate::envelope::EncryptedEnvelope;
use crate::error::{CipherError, Result};
use crate::keys::{MessageKey, X25519StaticSecret};

/// Algorithm label carried by every envelope this cipher produces.
pub const ALGORITHM: &str = "x25519-xchacha20poly1305";

/// XChaCha20-Poly1305 nonce size.
pub const NONCE_LEN: usize = 24;

/// Output of [`encrypt`], before a classification is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub sender_public_key: EncryptionPublicKey,
    pub recipient_public_key: EncryptionPublicKey,
    pub algorithm: &'static str,
}

/// Encrypt `plaintext` from the holder of `sender_secret` to `recipient_public`.
///
/// `sender_public` must be the public half of `sender_secret`; it is what the
/// recipient uses to derive the same key.
pub fn encrypt(
    plaintext: &[u8],
    sender_secret: &X25519StaticSecret,
    sender_public: &EncryptionPublicKey,
    recipient_public: &EncryptionPublicKey,
) -> Result<SealedMessage> {
    if !sender_secret.owns(sender_public) {
        return Err(CipherError::KeyMismatch);
    }

    let key = sender_secret
        .diffie_hellman(recipient_public)
        .message_key(sender_public, recipient_public);

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = aead(&key)?
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|e| CipherError::EncryptionError(e.to_string()))?;

    Ok(SealedMessage {
        ciphertext,
        nonce,
        sender_public_key: *sender_public,
        recipient_public_key: *recipient_public,
        algorithm: ALGORITHM,
    })
}

/// Decrypt an envelope with the recipient's secret.
///
/// Any secret other than the intended recipient's fails with
/// [`CipherError::AuthenticationFailed`]. No plaintext is returned unless the
/// tag verifies.
pub fn decrypt(envelope: &EncryptedEnvelope, recipient_secret: &X25519StaticSecret) -> Result<Vec<u8>> {
    if envelope.algorithm != ALGORITHM {
        return Err(CipherError::UnsupportedAlgorithm(envelope.algorithm.clone()));
    }
    if envelope.nonce.len() != NONCE_LEN {
        return Err(CipherError::MalformedEnvelope(format!(
            "nonce must be {} bytes, got {}",
            NONCE_LEN,
            envelope.nonce.len()
        )));
    }

    let key = recipient_secret
        .diffie_hellman(&envelope.sender_public_key)
        .message_key(&envelope.sender_public_key, &envelope.recipient_public_key);

    aead(&key)?
        .decrypt(XNonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
        .map_err(|_| {
            tracing::debug!(
                level = %envelope.classification_label,
                "envelope failed authentication"
            );
            CipherError::AuthenticationFailed
        })
}

fn aead(key: &MessageKey) -> Result<XChaCha20Poly1305> {
    XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| CipherError::EncryptionError(e.to_string()))
}
