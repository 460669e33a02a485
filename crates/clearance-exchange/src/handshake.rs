//! Credential handshake.
//!
//! Before encrypting to a peer we need the peer's current clearance
//! credential. The coordinator asks for it with a presentation request and
//! then watches the message store, which the inbound router fills, for an
//! acceptable response.
//!
//! ## Protocol
//!
//! ```text
//! 1. Register a session for the peer (one at a time per peer)
//! 2. Purge the peer's cached credentials and older responses
//! 3. Send a presentation request
//! 4. Poll stored PresentationResponse messages until one validates
//!    or the deadline passes
//! ```
//!
//! Responses claiming a timestamp earlier than the session start are stale and
//! ignored. A timestamp of zero means the sender did not stamp the message and
//! is accepted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clearance_core::{
    now_millis, ConnectionDid, Credential, CredentialValidator, Message, MessageId, MessageKind,
    RawCredential,
};
use clearance_store::{CredentialStore, MessageFilter, MessageStore};
use serde_json::json;
use tokio::time::{Instant, MissedTickBehavior};

use crate::attachments::decode_candidates;
use crate::error::HandshakeError;
use crate::transport::Transport;

/// Result type for handshake operations.
pub type Result<T> = std::result::Result<T, HandshakeError>;

/// Credential type requested when the policy names no clearance schema.
pub const DEFAULT_CREDENTIAL_TYPE: &str = "SecurityClearanceCredential";

/// Configuration for the handshake coordinator.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// How long to wait for a presentation.
    pub timeout: Duration,
    /// How often to re-read the store.
    pub poll_interval: Duration,
    /// Cached state younger than this survives the pre-handshake purge.
    pub purge_safety_margin: Duration,
    /// Credential type to request. Defaults to the policy's first schema.
    pub credential_type: Option<String>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(500),
            purge_safety_margin: Duration::from_secs(2),
            credential_type: None,
        }
    }
}

/// A validated credential obtained from a peer.
#[derive(Debug, Clone)]
pub struct PeerCredential {
    pub credential: Credential,
    pub raw: RawCredential,
    /// Where the response came from. Route follow-up messages here.
    pub connection_did: ConnectionDid,
    /// The response message the credential was taken from.
    pub response_id: MessageId,
}

/// A handshake in flight.
#[derive(Debug, Clone)]
pub struct HandshakeSession {
    pub peer: ConnectionDid,
    /// Wall-clock start (Unix ms), compared against response timestamps.
    pub started_at: i64,
    pub deadline: Instant,
}

#[derive(Default)]
struct SessionRegistry {
    sessions: Mutex<HashMap<ConnectionDid, HandshakeSession>>,
}

impl SessionRegistry {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionDid, HandshakeSession>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(self: &Arc<Self>, session: HandshakeSession) -> Result<SessionGuard> {
        let mut sessions = self.lock();
        let now = Instant::now();
        sessions.retain(|_, s| s.deadline > now);

        if sessions.contains_key(&session.peer) {
            return Err(HandshakeError::AlreadyInProgress(session.peer));
        }
        let peer = session.peer.clone();
        sessions.insert(peer.clone(), session);

        Ok(SessionGuard {
            registry: Arc::clone(self),
            peer,
        })
    }
}

/// Removes the session when the handshake ends, however it ends.
struct SessionGuard {
    registry: Arc<SessionRegistry>,
    peer: ConnectionDid,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.peer);
    }
}

/// Obtains validated peer credentials on demand.
pub struct HandshakeCoordinator<S: ?Sized, T: ?Sized> {
    store: Arc<S>,
    transport: Arc<T>,
    validator: Arc<CredentialValidator>,
    config: HandshakeConfig,
    registry: Arc<SessionRegistry>,
}

impl<S: ?Sized, T: ?Sized> Clone for HandshakeCoordinator<S, T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            validator: Arc::clone(&self.validator),
            config: self.config.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<S, T> HandshakeCoordinator<S, T>
where
    S: CredentialStore + MessageStore + ?Sized,
    T: Transport + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        transport: Arc<T>,
        validator: Arc<CredentialValidator>,
        config: HandshakeConfig,
    ) -> Self {
        Self {
            store,
            transport,
            validator,
            config,
            registry: Arc::new(SessionRegistry::default()),
        }
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// Whether a live handshake with `peer` is running.
    pub fn is_in_progress(&self, peer: &ConnectionDid) -> bool {
        let now = Instant::now();
        self.registry
            .lock()
            .get(peer)
            .map_or(false, |s| s.deadline > now)
    }

    /// Request and wait for a fresh credential from `peer`.
    ///
    /// Fails with [`HandshakeError::AlreadyInProgress`] if another handshake
    /// with the same peer is running, and with [`HandshakeError::Timeout`] if
    /// nothing acceptable arrives within `timeout`.
    pub async fn ensure_peer_credential(
        &self,
        peer: &ConnectionDid,
        timeout: Duration,
    ) -> Result<PeerCredential> {
        let started_at = now_millis();
        let _guard = self.registry.begin(HandshakeSession {
            peer: peer.clone(),
            started_at,
            deadline: Instant::now() + timeout,
        })?;

        tracing::info!(peer = %peer, ?timeout, "starting credential handshake");

        self.purge_stale(peer, started_at).await?;
        self.send_request(peer).await?;

        match self.await_response(peer, started_at, timeout).await {
            Some(found) => {
                tracing::info!(
                    peer = %peer,
                    connection_did = %found.connection_did,
                    level = %found.credential.clearance_level,
                    "credential handshake complete"
                );
                Ok(found)
            }
            None => {
                tracing::warn!(peer = %peer, ?timeout, "credential handshake timed out");
                Err(HandshakeError::Timeout {
                    peer: peer.clone(),
                    waited: timeout,
                })
            }
        }
    }

    /// Wait for a presentation from `peer` stamped at or after `since`,
    /// without sending a request or purging.
    pub async fn wait_for_presentation(
        &self,
        peer: &ConnectionDid,
        since: i64,
        timeout: Duration,
    ) -> Result<PeerCredential> {
        self.await_response(peer, since, timeout)
            .await
            .ok_or_else(|| HandshakeError::Timeout {
                peer: peer.clone(),
                waited: timeout,
            })
    }

    /// Drop cached credentials and responses from `peer` stored before the
    /// safety margin.
    async fn purge_stale(&self, peer: &ConnectionDid, started_at: i64) -> Result<()> {
        let margin = i64::try_from(self.config.purge_safety_margin.as_millis()).unwrap_or(i64::MAX);
        let cutoff = started_at.saturating_sub(margin);

        let credentials = self.store.delete_peer_credentials_before(peer, cutoff).await?;
        let responses = self
            .store
            .delete_messages(
                &MessageFilter::received(MessageKind::PresentationResponse, peer.clone())
                    .stored_before(cutoff),
            )
            .await?;

        if credentials + responses > 0 {
            tracing::debug!(peer = %peer, credentials, responses, "purged stale peer state");
        }
        Ok(())
    }

    async fn send_request(&self, peer: &ConnectionDid) -> Result<MessageId> {
        let credential_type = self
            .config
            .credential_type
            .clone()
            .or_else(|| self.validator.policy().clearance_schemas.first().cloned())
            .unwrap_or_else(|| DEFAULT_CREDENTIAL_TYPE.to_string());

        let request = Message::outbound(
            MessageKind::PresentationRequest,
            self.transport.local_did().clone(),
            peer.clone(),
            json!({
                "credentialType": credential_type,
                "toDid": peer.as_str(),
                "claims": {},
            }),
        );

        self.transport.send(&request).await?;
        self.store.insert_message(&request).await?;

        tracing::debug!(peer = %peer, request_id = %request.id, %credential_type, "presentation request sent");
        Ok(request.id)
    }

    /// Poll until an acceptable response shows up or `timeout` passes.
    async fn await_response(
        &self,
        peer: &ConnectionDid,
        since: i64,
        timeout: Duration,
    ) -> Option<PeerCredential> {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut examined = HashSet::new();
        loop {
            tokio::select! {
                _ = &mut deadline => return None,
                _ = ticker.tick() => {
                    match self.scan_responses(peer, since, &mut examined).await {
                        Ok(Some(found)) => return Some(found),
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(peer = %peer, error = %e, "reading presentation responses failed");
                        }
                    }
                }
            }
        }
    }

    async fn scan_responses(
        &self,
        peer: &ConnectionDid,
        since: i64,
        examined: &mut HashSet<MessageId>,
    ) -> std::result::Result<Option<PeerCredential>, clearance_store::StoreError> {
        let filter = MessageFilter {
            kind: Some(MessageKind::PresentationResponse),
            direction: Some(clearance_core::Direction::Received),
            ..MessageFilter::default()
        };

        for msg in self.store.list_messages(&filter).await? {
            // Only the peer's own connection may answer, even in our thread.
            if &msg.from != peer {
                continue;
            }
            if !examined.insert(msg.id.clone()) {
                continue;
            }
            if msg.timestamp != 0 && msg.timestamp < since {
                tracing::debug!(
                    peer = %peer,
                    message_id = %msg.id,
                    timestamp = msg.timestamp,
                    since,
                    "ignoring presentation response older than handshake"
                );
                continue;
            }

            let candidates = decode_candidates(&msg.attachments);
            if candidates.is_empty() {
                tracing::debug!(message_id = %msg.id, "presentation response carried no credentials");
            }
            for raw in candidates {
                if let Some(credential) = self.validator.accept(&raw) {
                    return Ok(Some(PeerCredential {
                        credential,
                        raw,
                        connection_did: msg.from.clone(),
                        response_id: msg.id.clone(),
                    }));
                }
            }
        }
        Ok(None)
    }
}
