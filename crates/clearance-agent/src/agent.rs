//! The Agent: one party's view of clearance-gated messaging.
//!
//! The Agent ties the credential store, the transport, the handshake
//! coordinator and the inbound router together behind a send/approve API.

use std::sync::Arc;

use clearance_cipher::{encrypt, ChatBody, EncryptedEnvelope, X25519StaticSecret};
use clearance_core::{
    now_millis, ClearanceLevel, Connection, ConnectionDid, Credential, CredentialHolder,
    CredentialValidator, Did, Message, MessageId, MessageKind, PresentationRequestRecord,
    RawCredential, StoredCredential, TrustPolicy,
};
use clearance_exchange::{
    holds_key, select_best_credential, HandshakeCoordinator, InboundChat, InboundRouter, LedgerError,
    PeerCredential, PresentationLedger, PresentationResponder, SchemaHints, Transport,
};
use clearance_store::FullStore;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};

/// What [`Agent::send`] dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: MessageId,
    /// Where the message was sent.
    pub connection_did: ConnectionDid,
    pub encrypted: bool,
    pub level: ClearanceLevel,
}

/// A party in clearance-gated conversations.
pub struct Agent<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    validator: Arc<CredentialValidator>,
    secret: X25519StaticSecret,
    hints: SchemaHints,
    config: AgentConfig,
    handshake: HandshakeCoordinator<S, T>,
    ledger: PresentationLedger<S>,
    responder: PresentationResponder<S, T>,
}

impl<S, T> Agent<S, T>
where
    S: FullStore + 'static,
    T: Transport + 'static,
{
    /// Create an agent.
    ///
    /// `secret` must be the private half of the encryption key published in
    /// this party's clearance credential.
    pub fn new(
        store: Arc<S>,
        transport: Arc<T>,
        policy: TrustPolicy,
        secret: X25519StaticSecret,
        config: AgentConfig,
    ) -> Self {
        let hints = SchemaHints::from_policy(&policy);
        let validator = Arc::new(CredentialValidator::new(policy));
        Self {
            handshake: HandshakeCoordinator::new(
                Arc::clone(&store),
                Arc::clone(&transport),
                Arc::clone(&validator),
                config.handshake.clone(),
            ),
            ledger: PresentationLedger::new(Arc::clone(&store)),
            responder: PresentationResponder::new(Arc::clone(&store), Arc::clone(&transport)),
            store,
            transport,
            validator,
            secret,
            hints,
            config,
        }
    }

    /// Replace the schema hints used to resolve inbound presentation requests.
    pub fn with_schema_hints(mut self, hints: SchemaHints) -> Self {
        self.hints = hints;
        self
    }

    /// The connection DID this agent receives at.
    pub fn local_did(&self) -> &ConnectionDid {
        self.transport.local_did()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn validator(&self) -> &CredentialValidator {
        &self.validator
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn handshake(&self) -> &HandshakeCoordinator<S, T> {
        &self.handshake
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connections and credentials
    // ─────────────────────────────────────────────────────────────────────────

    /// Record that `peer` is reachable at `connection_did`.
    pub async fn connect(&self, peer: Did, connection_did: ConnectionDid) -> Result<()> {
        let connection = Connection {
            peer,
            connection_did,
            created_at: now_millis(),
        };
        self.store.put_connection(&connection).await?;
        tracing::info!(
            peer = %connection.peer,
            connection_did = %connection.connection_did,
            "connection stored"
        );
        Ok(())
    }

    /// Validate and store a credential issued to us out of band.
    pub async fn import_credential(&self, raw: RawCredential) -> Result<Credential> {
        let credential = self.validator.check(&raw).map_err(|rejection| {
            tracing::debug!(%rejection, "imported credential rejected");
            AgentError::CredentialRejected(rejection)
        })?;
        if !self.secret.owns(&credential.encryption_public_key) {
            return Err(AgentError::KeyMismatch);
        }
        self.store
            .put_credential(&StoredCredential::new(CredentialHolder::Own, raw, now_millis()))
            .await?;
        Ok(credential)
    }

    /// Our validated credential with the highest clearance, among those
    /// publishing the key our secret opens.
    pub async fn own_credential(&self) -> Result<Option<Credential>> {
        let own = self.store.list_credentials(&CredentialHolder::Own).await?;
        Ok(own
            .iter()
            .filter_map(|c| self.validator.accept(&c.raw))
            .filter(|c| self.secret.owns(&c.encryption_public_key))
            .max_by_key(|c| c.clearance_level))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Send Path
    // ─────────────────────────────────────────────────────────────────────────

    /// Send `plaintext` to `recipient` classified at `level`.
    ///
    /// Unclassified messages go out in the clear with no handshake. Anything
    /// above that is encrypted to a freshly validated recipient credential.
    /// If any check fails nothing is dispatched.
    pub async fn send(
        &self,
        plaintext: &str,
        recipient: &Did,
        level: ClearanceLevel,
    ) -> Result<SendReceipt> {
        let connection = self
            .store
            .get_connection(recipient)
            .await?
            .ok_or_else(|| AgentError::NoConnection(recipient.clone()))?;

        if level == ClearanceLevel::Unclassified {
            let body = ChatBody::plain(plaintext, now_millis());
            return self
                .dispatch(connection.connection_did, body, false, level)
                .await;
        }

        let own = self.own_credential().await?;
        let held = own
            .as_ref()
            .map_or(ClearanceLevel::Unclassified, |c| c.clearance_level);
        let own = match own {
            Some(own) if held.permits(level) => own,
            _ => {
                tracing::warn!(%held, required = %level, "send refused: sender clearance too low");
                return Err(AgentError::InsufficientSenderClearance {
                    held,
                    required: level,
                });
            }
        };

        let (peer, route_to) = self.recipient_credential(&connection).await?;
        if !peer.clearance_level.permits(level) {
            tracing::warn!(
                peer = %route_to,
                held = %peer.clearance_level,
                required = %level,
                "send refused: recipient clearance too low"
            );
            return Err(AgentError::InsufficientRecipientClearance {
                peer: route_to,
                held: peer.clearance_level,
                required: level,
            });
        }

        let sealed = encrypt(
            plaintext.as_bytes(),
            &self.secret,
            &own.encryption_public_key,
            &peer.encryption_public_key,
        )?;
        let envelope = EncryptedEnvelope::seal(sealed, level);
        let body = ChatBody::encrypted(&envelope, now_millis())?;

        self.dispatch(route_to, body, true, level).await
    }

    /// The recipient's credential and where to send to.
    async fn recipient_credential(
        &self,
        connection: &Connection,
    ) -> Result<(Credential, ConnectionDid)> {
        if self.config.reuse_cached_peer_credentials {
            let holder = CredentialHolder::Peer(connection.connection_did.clone());
            let cached = self.store.list_credentials(&holder).await?;
            // Oldest first, so the newest valid one is found from the back.
            if let Some(credential) = cached.iter().rev().find_map(|c| self.validator.accept(&c.raw)) {
                tracing::debug!(peer = %connection.connection_did, "using cached peer credential");
                return Ok((credential, connection.connection_did.clone()));
            }
        }

        let PeerCredential {
            credential,
            connection_did,
            ..
        } = self
            .handshake
            .ensure_peer_credential(&connection.connection_did, self.config.handshake.timeout)
            .await?;
        Ok((credential, connection_did))
    }

    async fn dispatch(
        &self,
        to: ConnectionDid,
        body: ChatBody,
        encrypted: bool,
        level: ClearanceLevel,
    ) -> Result<SendReceipt> {
        let message = Message::outbound(
            MessageKind::Chat,
            self.transport.local_did().clone(),
            to,
            body.to_value(),
        );
        self.transport.send(&message).await?;
        self.store.insert_message(&message).await?;

        tracing::info!(
            message_id = %message.id,
            to = %message.to,
            encrypted,
            %level,
            "chat message sent"
        );
        Ok(SendReceipt {
            message_id: message.id,
            connection_did: message.to,
            encrypted,
            level,
        })
    }

    /// Wait up to `presentation_wait` for `peer` to present a credential
    /// stamped at or after `since`. No request is sent.
    pub async fn await_presentation(&self, peer: &Did, since: i64) -> Result<PeerCredential> {
        let connection = self
            .store
            .get_connection(peer)
            .await?
            .ok_or_else(|| AgentError::NoConnection(peer.clone()))?;
        Ok(self
            .handshake
            .wait_for_presentation(&connection.connection_did, since, self.config.presentation_wait)
            .await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Presentation Requests
    // ─────────────────────────────────────────────────────────────────────────

    /// Requests waiting for a decision, in arrival order.
    pub async fn pending_presentation_requests(&self) -> Result<Vec<PresentationRequestRecord>> {
        Ok(self.ledger.pending().await?)
    }

    /// Answer a pending request.
    ///
    /// With no `credential_id`, the best own credential for the request's
    /// resolved schema is used.
    pub async fn approve_presentation_request(
        &self,
        id: &MessageId,
        credential_id: Option<&str>,
    ) -> Result<MessageId> {
        let record = self
            .ledger
            .get(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(id.clone()))?;

        let credential = match credential_id {
            Some(cid) => {
                let credential = self
                    .store
                    .get_credential(cid)
                    .await?
                    .filter(|c| c.holder == CredentialHolder::Own)
                    .ok_or_else(|| AgentError::CredentialNotFound(cid.to_string()))?;
                if !holds_key(&self.validator, &self.secret, &credential) {
                    return Err(AgentError::KeyMismatch);
                }
                credential
            }
            None => {
                let schema_id = record
                    .schema_id
                    .as_deref()
                    .ok_or_else(|| AgentError::NoMatchingCredential(id.clone()))?;
                let own = self.store.list_credentials(&CredentialHolder::Own).await?;
                select_best_credential(&self.validator, &self.secret, &own, schema_id)
                    .cloned()
                    .ok_or_else(|| AgentError::NoMatchingCredential(id.clone()))?
            }
        };

        Ok(self.responder.respond(&record, &credential).await?)
    }

    /// Decline a pending request. Nothing is sent to the requester.
    pub async fn decline_presentation_request(&self, id: &MessageId) -> Result<()> {
        self.ledger.mark_declined(id).await?;
        tracing::info!(request_id = %id, "presentation request declined");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Build an inbound router sharing this agent's store and transport.
    pub fn router(&self) -> InboundRouter<S, T> {
        InboundRouter::new(
            Arc::clone(&self.store),
            Arc::clone(&self.transport),
            Arc::clone(&self.validator),
            self.secret.clone(),
            self.hints.clone(),
            self.config.router.clone(),
        )
    }

    /// Run an inbound router on the runtime until `shutdown` turns true.
    ///
    /// Chat messages are forwarded to `chats` when given.
    pub fn spawn_router(
        &self,
        shutdown: watch::Receiver<bool>,
        chats: Option<mpsc::Sender<InboundChat>>,
    ) -> JoinHandle<()> {
        let mut router = self.router();
        if let Some(sink) = chats {
            router = router.with_chat_sink(sink);
        }
        tokio::spawn(async move { router.run(shutdown).await })
    }
}
