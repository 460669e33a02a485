//! Error types for the message cipher.

use thiserror::Error;

/// Errors that can occur while sealing or opening a message.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The authentication tag did not verify. The ciphertext was tampered
    /// with or the wrong secret was used; retrying will not help.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The supplied public key does not belong to the supplied secret.
    #[error("public key does not match secret key")]
    KeyMismatch,

    /// Envelope is missing fields or has fields of the wrong size.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Envelope names an algorithm this cipher does not implement.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Encryption itself failed.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Core error.
    #[error("core error: {0}")]
    CoreError(#[from] clearance_core::CoreError),
}

/// Result type for cipher operations.
pub type Result<T> = std::result::Result<T, CipherError>;
