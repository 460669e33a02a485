//! Transport abstraction.
//!
//! The transport is a store-and-forward mediator: `send` hands a message
//! over for delivery to `message.to`, `poll` drains whatever has arrived
//! for this party since the last poll. Implementations may use HTTP,
//! WebSockets or anything else.

use async_trait::async_trait;
use clearance_core::{ConnectionDid, Message};

use crate::error::TransportError;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Transport trait for sending and receiving messages.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a message to `message.to`.
    async fn send(&self, message: &Message) -> Result<()>;

    /// Take every message that arrived since the last poll.
    async fn poll(&self) -> Result<Vec<Message>>;

    /// The connection DID this transport receives at.
    fn local_did(&self) -> &ConnectionDid;
}

/// An in-memory mediator for tests and demos.
///
/// Routes messages between transports created from the same network.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex, RwLock};

    /// Shared state for the memory transport network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        /// Inbox senders keyed by every DID they receive at.
        inboxes: RwLock<HashMap<ConnectionDid, mpsc::Sender<Message>>>,
        /// Every message handed to the network, in order.
        log: Mutex<Vec<Message>>,
        /// Whether senders get a copy of their own messages back.
        echo: bool,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// A network that also delivers each message back to its sender,
        /// the way some mediators do.
        pub fn with_echo() -> Arc<Self> {
            Arc::new(Self {
                echo: true,
                ..Self::default()
            })
        }

        /// Create a transport receiving at `did`.
        pub async fn create_transport(self: &Arc<Self>, did: ConnectionDid) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(1000);
            self.inboxes.write().await.insert(did.clone(), tx);

            MemoryTransport {
                did,
                network: Arc::clone(self),
                receiver: Mutex::new(rx),
            }
        }

        /// Make `transport` also receive messages addressed to `alias`.
        pub async fn add_alias(&self, transport: &MemoryTransport, alias: ConnectionDid) {
            let mut inboxes = self.inboxes.write().await;
            if let Some(tx) = inboxes.get(&transport.did).cloned() {
                inboxes.insert(alias, tx);
            }
        }

        /// Messages sent by `from`, in send order.
        pub async fn sent_by(&self, from: &ConnectionDid) -> Vec<Message> {
            self.log
                .lock()
                .await
                .iter()
                .filter(|m| &m.from == from)
                .cloned()
                .collect()
        }

        async fn deliver(&self, to: &ConnectionDid, message: Message) -> Result<()> {
            let tx = self
                .inboxes
                .read()
                .await
                .get(to)
                .cloned()
                .ok_or_else(|| TransportError::UnknownRecipient(to.clone()))?;
            tx.send(message).await.map_err(|_| TransportError::Closed)
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        did: ConnectionDid,
        network: Arc<MemoryNetwork>,
        receiver: Mutex<mpsc::Receiver<Message>>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, message: &Message) -> Result<()> {
            self.network.deliver(&message.to, message.as_received()).await?;
            self.network.log.lock().await.push(message.clone());

            if self.network.echo {
                // Echo failures are not the sender's problem.
                let _ = self.network.deliver(&self.did, message.as_received()).await;
            }
            Ok(())
        }

        async fn poll(&self) -> Result<Vec<Message>> {
            let mut rx = self.receiver.lock().await;
            let mut out = Vec::new();
            while let Ok(message) = rx.try_recv() {
                out.push(message);
            }
            Ok(out)
        }

        fn local_did(&self) -> &ConnectionDid {
            &self.did
        }
    }
}
