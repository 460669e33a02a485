//! Error types for the clearance core.

use thiserror::Error;

/// Errors raised while parsing or decoding core types.
///
/// Validation of a credential never produces one of these: the validator
/// answers "trusted" or "absent". These are for the decoding steps that come
/// before validation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown clearance level: {0}")]
    UnknownClearanceLevel(String),

    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("malformed credential: {0}")]
    MalformedCredential(String),

    #[error("malformed JWS: {0}")]
    MalformedJws(String),

    #[error("invalid selective disclosure: {0}")]
    InvalidDisclosure(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
