//! Store traits: the persistence interfaces the messaging layer consumes.
//!
//! Three traits, one per kind of record. Every implementation in this crate
//! implements all three so a single `Arc` can be shared by the router, the
//! handshake coordinator and the send path.

use async_trait::async_trait;
use clearance_core::{
    Connection, ConnectionDid, CredentialHolder, Did, Direction, Message, MessageId, MessageKind,
    PresentationRequestRecord, PresentationStatus, StoredCredential,
};

use crate::error::Result;

/// Result of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// The record was new.
    Inserted,
    /// A record with the same id already exists (not an error).
    AlreadyExists,
}

/// Result of a compare-and-set on a presentation request's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    Updated,
    NotFound,
    /// The record was not in the expected state; carries the actual one.
    Mismatch(PresentationStatus),
}

/// Message selection. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub kind: Option<MessageKind>,
    pub from: Option<ConnectionDid>,
    pub direction: Option<Direction>,
    /// Only messages stored locally strictly before this time (Unix ms).
    pub stored_before: Option<i64>,
}

impl MessageFilter {
    /// Received messages of `kind` from `from`.
    pub fn received(kind: MessageKind, from: ConnectionDid) -> Self {
        Self {
            kind: Some(kind),
            from: Some(from),
            direction: Some(Direction::Received),
            stored_before: None,
        }
    }

    /// Restrict to messages stored before `at`.
    pub fn stored_before(mut self, at: i64) -> Self {
        self.stored_before = Some(at);
        self
    }

    /// Whether a message stored at `stored_at` matches.
    pub fn matches(&self, message: &Message, stored_at: i64) -> bool {
        self.kind.as_ref().map_or(true, |k| &message.kind == k)
            && self.from.as_ref().map_or(true, |f| &message.from == f)
            && self.direction.map_or(true, |d| message.direction == d)
            && self.stored_before.map_or(true, |t| stored_at < t)
    }
}

/// Credentials held by this party and cached from peers.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert or replace a credential by id.
    async fn put_credential(&self, credential: &StoredCredential) -> Result<()>;

    /// Get a credential by id.
    async fn get_credential(&self, id: &str) -> Result<Option<StoredCredential>>;

    /// All credentials for a holder, oldest first.
    async fn list_credentials(&self, holder: &CredentialHolder) -> Result<Vec<StoredCredential>>;

    /// Delete a credential. Returns whether it existed.
    async fn delete_credential(&self, id: &str) -> Result<bool>;

    /// Delete a peer's credentials received strictly before `before`.
    ///
    /// Returns the number deleted.
    async fn delete_peer_credentials_before(
        &self,
        peer: &ConnectionDid,
        before: i64,
    ) -> Result<usize>;
}

/// Messages and the presentation request ledger.
#[async_trait]
pub trait MessageStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a message keyed by its id.
    async fn insert_message(&self, message: &Message) -> Result<InsertResult>;

    /// Get a message by id.
    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>>;

    /// Messages matching `filter`, in insertion order.
    async fn list_messages(&self, filter: &MessageFilter) -> Result<Vec<Message>>;

    /// Delete messages matching `filter`. Returns the number deleted.
    async fn delete_messages(&self, filter: &MessageFilter) -> Result<usize>;

    // ─────────────────────────────────────────────────────────────────────────
    // Presentation requests
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a request record keyed by its id.
    async fn insert_presentation_request(
        &self,
        record: &PresentationRequestRecord,
    ) -> Result<InsertResult>;

    /// Get a request record by id.
    async fn get_presentation_request(
        &self,
        id: &MessageId,
    ) -> Result<Option<PresentationRequestRecord>>;

    /// Set the status to `to` if it is currently `from`.
    async fn update_presentation_status(
        &self,
        id: &MessageId,
        from: PresentationStatus,
        to: PresentationStatus,
    ) -> Result<StatusUpdate>;

    /// Records with the given status (all when `None`), in arrival order.
    async fn list_presentation_requests(
        &self,
        status: Option<PresentationStatus>,
    ) -> Result<Vec<PresentationRequestRecord>>;
}

/// Established pairings between peers and their connection DIDs.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Insert or replace the pairing for `connection.peer`.
    async fn put_connection(&self, connection: &Connection) -> Result<()>;

    /// Get the pairing for a peer.
    async fn get_connection(&self, peer: &Did) -> Result<Option<Connection>>;

    /// All pairings.
    async fn list_connections(&self) -> Result<Vec<Connection>>;

    /// Delete a pairing. Returns whether it existed.
    async fn delete_connection(&self, peer: &Did) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches() {
        let mut msg = Message::outbound(
            MessageKind::PresentationResponse,
            ConnectionDid::new("did:peer:bob"),
            ConnectionDid::new("did:peer:alice"),
            json!({}),
        );
        msg.direction = Direction::Received;

        let filter = MessageFilter::received(
            MessageKind::PresentationResponse,
            ConnectionDid::new("did:peer:bob"),
        );
        assert!(filter.matches(&msg, 100));
        assert!(filter.clone().stored_before(101).matches(&msg, 100));
        assert!(!filter.clone().stored_before(100).matches(&msg, 100));

        let other = MessageFilter::received(MessageKind::Chat, ConnectionDid::new("did:peer:bob"));
        assert!(!other.matches(&msg, 100));
        assert!(MessageFilter::default().matches(&msg, 0));
    }
}
