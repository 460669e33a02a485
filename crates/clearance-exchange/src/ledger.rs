//! Presentation request ledger.
//!
//! Tracks inbound presentation requests through a three-state machine:
//!
//! ```text
//!            ┌──> Sent
//! Pending ───┤
//!            └──> Declined
//! ```
//!
//! `Pending` is the only non-terminal state. Records are never removed here;
//! callers decide retention.

use std::sync::Arc;

use clearance_core::{MessageId, PresentationRequestRecord, PresentationStatus};
use clearance_store::{InsertResult, MessageStore, StatusUpdate};

use crate::error::LedgerError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// The presentation request state machine over a message store.
pub struct PresentationLedger<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for PresentationLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: MessageStore + ?Sized> PresentationLedger<S> {
    /// Create a ledger backed by `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Record a request as `Pending`. Re-recording a known id is a no-op.
    pub async fn record(&self, record: &PresentationRequestRecord) -> Result<InsertResult> {
        let mut record = record.clone();
        record.status = PresentationStatus::Pending;

        let result = self.store.insert_presentation_request(&record).await?;
        if result == InsertResult::Inserted {
            tracing::debug!(request_id = %record.id, peer = %record.peer, "presentation request recorded");
        }
        Ok(result)
    }

    /// `Pending -> Sent`.
    pub async fn mark_sent(&self, id: &MessageId) -> Result<()> {
        self.transition(id, PresentationStatus::Sent).await
    }

    /// `Pending -> Declined`.
    pub async fn mark_declined(&self, id: &MessageId) -> Result<()> {
        self.transition(id, PresentationStatus::Declined).await
    }

    /// Requests still pending, in arrival order.
    pub async fn pending(&self) -> Result<Vec<PresentationRequestRecord>> {
        Ok(self
            .store
            .list_presentation_requests(Some(PresentationStatus::Pending))
            .await?)
    }

    /// Look up a request.
    pub async fn get(&self, id: &MessageId) -> Result<Option<PresentationRequestRecord>> {
        Ok(self.store.get_presentation_request(id).await?)
    }

    async fn transition(&self, id: &MessageId, to: PresentationStatus) -> Result<()> {
        match self
            .store
            .update_presentation_status(id, PresentationStatus::Pending, to)
            .await?
        {
            StatusUpdate::Updated => {
                tracing::debug!(request_id = %id, status = %to, "presentation request resolved");
                Ok(())
            }
            StatusUpdate::NotFound => Err(LedgerError::NotFound(id.clone())),
            StatusUpdate::Mismatch(from) => Err(LedgerError::InvalidTransition {
                id: id.clone(),
                from,
                to,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearance_core::ConnectionDid;
    use clearance_store::MemoryStore;

    fn ledger() -> PresentationLedger<MemoryStore> {
        PresentationLedger::new(Arc::new(MemoryStore::new()))
    }

    fn request(id: &str) -> PresentationRequestRecord {
        PresentationRequestRecord::pending(MessageId::new(id), ConnectionDid::new("did:peer:bob"), 0)
    }

    #[tokio::test]
    async fn test_record_is_idempotent() {
        let ledger = ledger();
        assert_eq!(ledger.record(&request("r1")).await.unwrap(), InsertResult::Inserted);
        assert_eq!(ledger.record(&request("r1")).await.unwrap(), InsertResult::AlreadyExists);
        assert_eq!(ledger.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_forces_pending() {
        let ledger = ledger();
        let mut sneaky = request("r1");
        sneaky.status = PresentationStatus::Sent;
        ledger.record(&sneaky).await.unwrap();

        let stored = ledger.get(&MessageId::new("r1")).await.unwrap().unwrap();
        assert_eq!(stored.status, PresentationStatus::Pending);
    }

    #[tokio::test]
    async fn test_sent_then_declined_is_invalid() {
        let ledger = ledger();
        ledger.record(&request("r1")).await.unwrap();
        let id = MessageId::new("r1");

        ledger.mark_sent(&id).await.unwrap();
        let err = ledger.mark_declined(&id).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidTransition {
                from: PresentationStatus::Sent,
                to: PresentationStatus::Declined,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_declined_then_sent_is_invalid() {
        let ledger = ledger();
        ledger.record(&request("r1")).await.unwrap();
        let id = MessageId::new("r1");

        ledger.mark_declined(&id).await.unwrap();
        assert!(matches!(
            ledger.mark_sent(&id).await,
            Err(LedgerError::InvalidTransition { .. })
        ));
        assert!(matches!(
            ledger.mark_declined(&id).await,
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let ledger = ledger();
        assert!(matches!(
            ledger.mark_sent(&MessageId::new("ghost")).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_in_arrival_order() {
        let ledger = ledger();
        for id in ["c", "a", "b", "d"] {
            ledger.record(&request(id)).await.unwrap();
        }
        ledger.mark_sent(&MessageId::new("a")).await.unwrap();
        ledger.mark_declined(&MessageId::new("d")).await.unwrap();

        let pending = ledger.pending().await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }
}
