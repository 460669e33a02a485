//! # Clearance Cipher
//!
//! Authenticated encryption between two credential holders.
//!
//! ## Encryption Model
//!
//! 1. **Key agreement**: X25519 between the sender's secret and the
//!    recipient's credential-published public key
//! 2. **Key derivation**: Blake3 `derive_key` over the shared secret, bound to
//!    both public keys in sender-to-recipient order
//! 3. **AEAD**: XChaCha20-Poly1305 with a random 24-byte nonce per message
//!
//! The cipher is stateless and safe to call from any task. Secrets and
//! derived keys have redacting `Debug` impls.

pub mod cipher;
pub mod envelope;
pub mod error;
pub mod keys;

pub use cipher::{decrypt, encrypt, SealedMessage, ALGORITHM, NONCE_LEN};
pub use envelope::{ChatBody, EncryptedEnvelope, ENVELOPE_FIELDS};
pub use error::{CipherError, Result};
pub use keys::{MessageKey, SharedKey, X25519StaticSecret};
