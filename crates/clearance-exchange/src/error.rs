//! Error types for the exchange module.

use std::time::Duration;

use clearance_core::{ConnectionDid, MessageId, PresentationStatus};
use thiserror::Error;

/// Errors from the message transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No route to the addressed DID.
    #[error("no route to {0}")]
    UnknownRecipient(ConnectionDid),

    /// The transport has shut down.
    #[error("transport closed")]
    Closed,

    /// Any other delivery failure.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Errors from the presentation request ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No request with this id was recorded.
    #[error("presentation request not found: {0}")]
    NotFound(MessageId),

    /// The request is not in a state that allows the transition.
    #[error("invalid transition for presentation request {id}: {from} -> {to}")]
    InvalidTransition {
        id: MessageId,
        from: PresentationStatus,
        to: PresentationStatus,
    },

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] clearance_store::StoreError),
}

/// Errors from the handshake coordinator.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// A handshake with this peer is already running.
    #[error("handshake with {0} already in progress")]
    AlreadyInProgress(ConnectionDid),

    /// No acceptable presentation arrived before the deadline.
    #[error(
        "handshake with {peer} timed out after {waited:?}: \
         the peer may not hold a clearance credential from a trusted issuer"
    )]
    Timeout { peer: ConnectionDid, waited: Duration },

    /// Sending the presentation request failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] clearance_store::StoreError),
}

/// Errors surfaced by the inbound router and presentation responder.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] clearance_store::StoreError),

    /// Ledger operation failed.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for exchange operations.
pub type Result<T> = std::result::Result<T, ExchangeError>;
