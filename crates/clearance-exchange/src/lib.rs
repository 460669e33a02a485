//! # Clearance Exchange
//!
//! Everything that happens between two parties before and after a message is
//! encrypted: presentation requests and responses, the credential handshake,
//! and inbound routing.
//!
//! ## Key Types
//!
//! - [`Transport`] - Store-and-forward mediator abstraction
//! - [`PresentationLedger`] - `Pending -> Sent | Declined` request tracking
//! - [`HandshakeCoordinator`] - Obtains a fresh, validated peer credential
//! - [`InboundRouter`] - Dedupes and dispatches received messages
//! - [`PresentationResponder`] - Answers requests with our own credentials
//!
//! ## Data Flow
//!
//! ```text
//! Transport::poll ──> InboundRouter ──> MessageStore
//!                          │                 ^
//!                          ├──> ledger       │ poll
//!                          └──> chat sink    │
//!                                     HandshakeCoordinator
//! ```

pub mod attachments;
pub mod error;
pub mod handshake;
pub mod hints;
pub mod ledger;
pub mod responder;
pub mod router;
pub mod transport;

pub use attachments::decode_candidates;
pub use error::{ExchangeError, HandshakeError, LedgerError, Result, TransportError};
pub use handshake::{
    HandshakeConfig, HandshakeCoordinator, HandshakeSession, PeerCredential,
    DEFAULT_CREDENTIAL_TYPE,
};
pub use hints::{SchemaHints, SchemaSignal};
pub use ledger::PresentationLedger;
pub use responder::{holds_key, select_best_credential, PresentationResponder, SUBMISSION_FORMAT};
pub use router::{ChatContent, InboundChat, InboundRouter, RouteOutcome, RouterConfig, SkipReason};
pub use transport::memory::{MemoryNetwork, MemoryTransport};
pub use transport::Transport;
