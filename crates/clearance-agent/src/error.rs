//! Error types for the agent.

use clearance_cipher::CipherError;
use clearance_core::{ClearanceLevel, ConnectionDid, Did, MessageId, Rejection};
use clearance_exchange::{ExchangeError, HandshakeError, LedgerError, TransportError};
use clearance_store::StoreError;
use thiserror::Error;

/// Errors that can occur during agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No connection has been established with the recipient.
    #[error("no connection established with {0}")]
    NoConnection(Did),

    /// Our own clearance is below the requested level. `held` is
    /// `Unclassified` when we hold no usable credential at all.
    #[error("sender clearance {held} is below required {required}")]
    InsufficientSenderClearance {
        held: ClearanceLevel,
        required: ClearanceLevel,
    },

    /// The recipient's clearance is below the requested level.
    #[error("recipient {peer} holds {held} clearance, {required} required")]
    InsufficientRecipientClearance {
        peer: ConnectionDid,
        held: ClearanceLevel,
        required: ClearanceLevel,
    },

    /// A credential offered as ours publishes a key our secret does not match.
    #[error("credential encryption key does not match the local secret")]
    KeyMismatch,

    /// A credential offered for import failed validation.
    #[error("credential rejected: {0}")]
    CredentialRejected(Rejection),

    /// A credential named for a presentation is not one of ours.
    #[error("own credential not found: {0}")]
    CredentialNotFound(String),

    /// A presentation request has no credential to answer it with.
    #[error("no credential available for presentation request {0}")]
    NoMatchingCredential(MessageId),

    /// Handshake error.
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Cipher error.
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Ledger error.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Exchange error.
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;
