//! In-memory implementation of the store traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use clearance_core::{
    now_millis, Connection, ConnectionDid, CredentialHolder, Did, Message, MessageId,
    PresentationRequestRecord, PresentationStatus, StoredCredential,
};

use crate::error::{Result, StoreError};
use crate::traits::{
    ConnectionStore, CredentialStore, InsertResult, MessageFilter, MessageStore, StatusUpdate,
};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Credentials in insertion order.
    credentials: Vec<StoredCredential>,

    /// Messages in insertion order, with local storage time.
    messages: Vec<(Message, i64)>,

    /// Presentation requests in arrival order.
    presentation_requests: Vec<PresentationRequestRecord>,

    /// Pairings keyed by peer.
    connections: HashMap<Did, Connection>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn put_credential(&self, credential: &StoredCredential) -> Result<()> {
        let mut inner = self.write()?;
        match inner.credentials.iter_mut().find(|c| c.id == credential.id) {
            Some(existing) => *existing = credential.clone(),
            None => inner.credentials.push(credential.clone()),
        }
        Ok(())
    }

    async fn get_credential(&self, id: &str) -> Result<Option<StoredCredential>> {
        let inner = self.read()?;
        Ok(inner.credentials.iter().find(|c| c.id == id).cloned())
    }

    async fn list_credentials(&self, holder: &CredentialHolder) -> Result<Vec<StoredCredential>> {
        let inner = self.read()?;
        let mut found: Vec<StoredCredential> = inner
            .credentials
            .iter()
            .filter(|c| &c.holder == holder)
            .cloned()
            .collect();
        // Stable sort keeps insertion order among equal timestamps.
        found.sort_by_key(|c| c.received_at);
        Ok(found)
    }

    async fn delete_credential(&self, id: &str) -> Result<bool> {
        let mut inner = self.write()?;
        let before = inner.credentials.len();
        inner.credentials.retain(|c| c.id != id);
        Ok(inner.credentials.len() != before)
    }

    async fn delete_peer_credentials_before(
        &self,
        peer: &ConnectionDid,
        before: i64,
    ) -> Result<usize> {
        let mut inner = self.write()?;
        let holder = CredentialHolder::Peer(peer.clone());
        let count = inner.credentials.len();
        inner
            .credentials
            .retain(|c| !(c.holder == holder && c.received_at < before));
        Ok(count - inner.credentials.len())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_message(&self, message: &Message) -> Result<InsertResult> {
        let mut inner = self.write()?;
        if inner.messages.iter().any(|(m, _)| m.id == message.id) {
            return Ok(InsertResult::AlreadyExists);
        }
        inner.messages.push((message.clone(), now_millis()));
        Ok(InsertResult::Inserted)
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let inner = self.read()?;
        Ok(inner
            .messages
            .iter()
            .find(|(m, _)| &m.id == id)
            .map(|(m, _)| m.clone()))
    }

    async fn list_messages(&self, filter: &MessageFilter) -> Result<Vec<Message>> {
        let inner = self.read()?;
        Ok(inner
            .messages
            .iter()
            .filter(|(m, stored_at)| filter.matches(m, *stored_at))
            .map(|(m, _)| m.clone())
            .collect())
    }

    async fn delete_messages(&self, filter: &MessageFilter) -> Result<usize> {
        let mut inner = self.write()?;
        let count = inner.messages.len();
        inner
            .messages
            .retain(|(m, stored_at)| !filter.matches(m, *stored_at));
        Ok(count - inner.messages.len())
    }

    async fn insert_presentation_request(
        &self,
        record: &PresentationRequestRecord,
    ) -> Result<InsertResult> {
        let mut inner = self.write()?;
        if inner.presentation_requests.iter().any(|r| r.id == record.id) {
            return Ok(InsertResult::AlreadyExists);
        }
        inner.presentation_requests.push(record.clone());
        Ok(InsertResult::Inserted)
    }

    async fn get_presentation_request(
        &self,
        id: &MessageId,
    ) -> Result<Option<PresentationRequestRecord>> {
        let inner = self.read()?;
        Ok(inner.presentation_requests.iter().find(|r| &r.id == id).cloned())
    }

    async fn update_presentation_status(
        &self,
        id: &MessageId,
        from: PresentationStatus,
        to: PresentationStatus,
    ) -> Result<StatusUpdate> {
        let mut inner = self.write()?;
        let Some(record) = inner.presentation_requests.iter_mut().find(|r| &r.id == id) else {
            return Ok(StatusUpdate::NotFound);
        };
        if record.status != from {
            return Ok(StatusUpdate::Mismatch(record.status));
        }
        record.status = to;
        Ok(StatusUpdate::Updated)
    }

    async fn list_presentation_requests(
        &self,
        status: Option<PresentationStatus>,
    ) -> Result<Vec<PresentationRequestRecord>> {
        let inner = self.read()?;
        Ok(inner
            .presentation_requests
            .iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn put_connection(&self, connection: &Connection) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .connections
            .insert(connection.peer.clone(), connection.clone());
        Ok(())
    }

    async fn get_connection(&self, peer: &Did) -> Result<Option<Connection>> {
        let inner = self.read()?;
        Ok(inner.connections.get(peer).cloned())
    }

    async fn list_connections(&self) -> Result<Vec<Connection>> {
        let inner = self.read()?;
        let mut all: Vec<Connection> = inner.connections.values().cloned().collect();
        all.sort_by(|a, b| a.peer.cmp(&b.peer));
        Ok(all)
    }

    async fn delete_connection(&self, peer: &Did) -> Result<bool> {
        let mut inner = self.write()?;
        Ok(inner.connections.remove(peer).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use clearance_core::MessageKind;

    #[tokio::test]
    async fn test_insert_message_is_idempotent() {
        let store = MemoryStore::new();
        let msg = received(MessageKind::Chat, "did:peer:bob", 1);

        assert_eq!(store.insert_message(&msg).await.unwrap(), InsertResult::Inserted);
        assert_eq!(store.insert_message(&msg).await.unwrap(), InsertResult::AlreadyExists);
        assert_eq!(store.list_messages(&MessageFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_credentials_by_holder_oldest_first() {
        let store = MemoryStore::new();
        let bob = CredentialHolder::Peer(ConnectionDid::new("did:peer:bob"));

        store.put_credential(&credential(bob.clone(), 20)).await.unwrap();
        store.put_credential(&credential(bob.clone(), 10)).await.unwrap();
        store.put_credential(&credential(CredentialHolder::Own, 5)).await.unwrap();

        let listed = store.list_credentials(&bob).await.unwrap();
        assert_eq!(listed.iter().map(|c| c.received_at).collect::<Vec<_>>(), vec![10, 20]);

        let deleted = store
            .delete_peer_credentials_before(&ConnectionDid::new("did:peer:bob"), 15)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.list_credentials(&bob).await.unwrap().len(), 1);
        assert_eq!(store.list_credentials(&CredentialHolder::Own).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_status_compare_and_set() {
        let store = MemoryStore::new();
        let record = pending_request("req-1", "did:peer:bob");
        store.insert_presentation_request(&record).await.unwrap();

        let id = MessageId::new("req-1");
        assert_eq!(
            store
                .update_presentation_status(&id, PresentationStatus::Pending, PresentationStatus::Sent)
                .await
                .unwrap(),
            StatusUpdate::Updated
        );
        assert_eq!(
            store
                .update_presentation_status(&id, PresentationStatus::Pending, PresentationStatus::Declined)
                .await
                .unwrap(),
            StatusUpdate::Mismatch(PresentationStatus::Sent)
        );
        assert_eq!(
            store
                .update_presentation_status(
                    &MessageId::new("nope"),
                    PresentationStatus::Pending,
                    PresentationStatus::Sent
                )
                .await
                .unwrap(),
            StatusUpdate::NotFound
        );
    }

    #[tokio::test]
    async fn test_connections_upsert() {
        let store = MemoryStore::new();
        store.put_connection(&connection("did:web:bob", "did:peer:bob-1")).await.unwrap();
        store.put_connection(&connection("did:web:bob", "did:peer:bob-2")).await.unwrap();

        let found = store.get_connection(&Did::new("did:web:bob")).await.unwrap().unwrap();
        assert_eq!(found.connection_did, ConnectionDid::new("did:peer:bob-2"));
        assert_eq!(store.list_connections().await.unwrap().len(), 1);
        assert!(store.delete_connection(&Did::new("did:web:bob")).await.unwrap());
        assert!(store.get_connection(&Did::new("did:web:bob")).await.unwrap().is_none());
    }
}
