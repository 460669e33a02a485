//! # Clearance Store
//!
//! Persistence interfaces for clearance-gated messaging, with SQLite and
//! in-memory implementations.
//!
//! ## Key Types
//!
//! - [`CredentialStore`] - Own credentials and cached peer credentials
//! - [`MessageStore`] - Transport messages and the presentation request ledger
//! - [`ConnectionStore`] - Peer DID to connection DID pairings
//! - [`SqliteStore`] - SQLite-backed implementation of all three
//! - [`MemoryStore`] - In-memory implementation for tests
//!
//! ## Design Notes
//!
//! - **Idempotent inserts**: inserting a message or request with a known id
//!   returns `AlreadyExists`. The inbound router relies on this for dedup.
//! - **Local timestamps**: purges filter on when a record was stored locally,
//!   never on the sender-claimed timestamp, which may be missing.
//! - **Compare-and-set**: presentation status changes name the expected
//!   current status so a terminal record is never overwritten.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    ConnectionStore, CredentialStore, InsertResult, MessageFilter, MessageStore, StatusUpdate,
};

/// A store that implements every store trait.
pub trait FullStore: CredentialStore + MessageStore + ConnectionStore {}

impl<T: CredentialStore + MessageStore + ConnectionStore> FullStore for T {}
