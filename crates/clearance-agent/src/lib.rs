//! # Clearance Agent
//!
//! Clearance-gated messaging between DID holders.
//!
//! A message classified above `UNCLASSIFIED` is only ever encrypted to a
//! recipient whose clearance credential, issued by a trusted issuer, was
//! validated moments before. Credentials are exchanged with DIDComm-style
//! presentation requests over a store-and-forward transport.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use clearance_agent::{Agent, AgentConfig};
//! use clearance_cipher::X25519StaticSecret;
//! use clearance_core::{ClearanceLevel, ConnectionDid, Did, TrustPolicy};
//! use clearance_exchange::MemoryNetwork;
//! use clearance_store::SqliteStore;
//!
//! async fn example(policy: TrustPolicy) -> Result<(), Box<dyn std::error::Error>> {
//!     let network = MemoryNetwork::new();
//!     let transport = network.create_transport(ConnectionDid::new("did:peer:alice")).await;
//!     let store = SqliteStore::open("alice.db")?;
//!
//!     let agent = Agent::new(
//!         Arc::new(store),
//!         Arc::new(transport),
//!         policy,
//!         X25519StaticSecret::generate(),
//!         AgentConfig::default(),
//!     );
//!
//!     let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!     agent.spawn_router(shutdown_rx, None);
//!
//!     agent.connect(Did::new("did:example:bob"), ConnectionDid::new("did:peer:bob")).await?;
//!     agent
//!         .send("meet at six", &Did::new("did:example:bob"), ClearanceLevel::Secret)
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `clearance_agent::core` - Identifiers, clearance levels, validation
//! - `clearance_agent::cipher` - Message encryption
//! - `clearance_agent::store` - Persistence
//! - `clearance_agent::exchange` - Handshake, ledger and routing

pub mod agent;
pub mod config;
pub mod error;

pub use clearance_cipher as cipher;
pub use clearance_core as core;
pub use clearance_exchange as exchange;
pub use clearance_store as store;

pub use agent::{Agent, SendReceipt};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
