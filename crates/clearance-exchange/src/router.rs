//! Inbound message routing.
//!
//! The router drains the transport, drops what is not for us, deduplicates by
//! message id and dispatches by [`MessageKind`]. It is the only writer of
//! received messages into the store; the handshake coordinator reads what the
//! router stored.

use std::sync::Arc;
use std::time::Duration;

use clearance_cipher::{decrypt, ChatBody, EncryptedEnvelope, X25519StaticSecret};
use clearance_core::{
    now_millis, ClearanceLevel, ConnectionDid, CredentialHolder, CredentialValidator, Direction,
    Message, MessageId, MessageKind, PresentationRequestRecord, StoredCredential,
};
use clearance_store::{FullStore, InsertResult, MessageFilter};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::attachments::decode_candidates;
use crate::error::Result;
use crate::hints::SchemaHints;
use crate::ledger::PresentationLedger;
use crate::responder::{holds_key, select_best_credential, PresentationResponder};
use crate::transport::Transport;

/// Configuration for the inbound router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// How often `run` polls the transport.
    pub poll_interval: Duration,
    /// Answer resolvable presentation requests without asking.
    pub auto_respond: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            auto_respond: true,
        }
    }
}

/// What a chat message turned out to contain.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatContent {
    /// Sent in the clear.
    Plain(String),
    /// Decrypted from an envelope classified at `level`.
    Decrypted { text: String, level: ClearanceLevel },
    /// An envelope we could not or may not open.
    Undecryptable { placeholder: String, reason: String },
    /// A body that is not a chat body, passed through untouched.
    Opaque(Value),
}

/// A chat message delivered to the application.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundChat {
    pub message_id: MessageId,
    pub from: ConnectionDid,
    pub timestamp: i64,
    pub content: ChatContent,
}

/// Why a message was not dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotReceived,
    SelfAuthored,
    Duplicate,
    /// A presentation older than the one already cached for the peer.
    Superseded,
}

/// The result of routing one message.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Skipped(SkipReason),
    /// Nothing to do beyond logging.
    Logged(MessageKind),
    /// Credentials issued to us were stored.
    CredentialsStored(usize),
    /// A presentation request was answered automatically.
    PresentationResponded {
        request_id: MessageId,
        credential_id: String,
    },
    /// The requested schema could not be determined.
    NeedsManualReview { request_id: MessageId },
    /// The request was recorded and waits for a decision or a credential.
    AwaitingApproval {
        request_id: MessageId,
        schema_id: String,
    },
    /// A peer's presented credentials replaced its cached ones.
    PeerCredentialsCached { peer: ConnectionDid, count: usize },
    Chat(InboundChat),
}

/// Routes inbound messages for one party.
pub struct InboundRouter<S: ?Sized, T: ?Sized> {
    store: Arc<S>,
    transport: Arc<T>,
    validator: Arc<CredentialValidator>,
    secret: X25519StaticSecret,
    hints: SchemaHints,
    config: RouterConfig,
    ledger: PresentationLedger<S>,
    responder: PresentationResponder<S, T>,
    chats: Option<mpsc::Sender<InboundChat>>,
}

impl<S, T> InboundRouter<S, T>
where
    S: FullStore + ?Sized,
    T: Transport + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        transport: Arc<T>,
        validator: Arc<CredentialValidator>,
        secret: X25519StaticSecret,
        hints: SchemaHints,
        config: RouterConfig,
    ) -> Self {
        Self {
            ledger: PresentationLedger::new(Arc::clone(&store)),
            responder: PresentationResponder::new(Arc::clone(&store), Arc::clone(&transport)),
            store,
            transport,
            validator,
            secret,
            hints,
            config,
            chats: None,
        }
    }

    /// Forward every routed chat message to `sink`.
    pub fn with_chat_sink(mut self, sink: mpsc::Sender<InboundChat>) -> Self {
        self.chats = Some(sink);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Drain the transport once and route everything it returned.
    pub async fn poll_once(&self) -> Result<Vec<RouteOutcome>> {
        let messages = self.transport.poll().await?;
        let mut outcomes = Vec::with_capacity(messages.len());
        for message in messages {
            match self.route(message).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::warn!(error = %e, "routing inbound message failed"),
            }
        }
        Ok(outcomes)
    }

    /// Poll every `poll_interval` until `shutdown` turns true or its sender
    /// goes away.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(local = %self.transport.local_did(), "inbound router started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!(error = %e, "transport poll failed");
                    }
                }
            }
        }
        tracing::info!(local = %self.transport.local_did(), "inbound router stopped");
    }

    /// Route a single message.
    pub async fn route(&self, message: Message) -> Result<RouteOutcome> {
        if message.direction != Direction::Received {
            return Ok(RouteOutcome::Skipped(SkipReason::NotReceived));
        }
        if &message.from == self.transport.local_did() {
            tracing::debug!(message_id = %message.id, "dropping self-authored message");
            return Ok(RouteOutcome::Skipped(SkipReason::SelfAuthored));
        }

        match self.store.insert_message(&message).await {
            Ok(InsertResult::Inserted) => {}
            Ok(InsertResult::AlreadyExists) => {
                tracing::debug!(message_id = %message.id, "message already stored");
                return Ok(RouteOutcome::Skipped(SkipReason::Duplicate));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(
            message_id = %message.id,
            from = %message.from,
            kind = %message.kind,
            "routing inbound message"
        );

        match &message.kind {
            MessageKind::CredentialIssue => self.on_credential_issue(&message).await,
            MessageKind::PresentationRequest => self.on_presentation_request(&message).await,
            MessageKind::PresentationResponse => self.on_presentation_response(&message).await,
            MessageKind::Chat => self.on_chat(&message).await,
            MessageKind::CredentialOffer
            | MessageKind::ConnectionRequest
            | MessageKind::Unknown(_) => {
                tracing::info!(
                    message_id = %message.id,
                    from = %message.from,
                    kind = %message.kind,
                    "message logged without action"
                );
                Ok(RouteOutcome::Logged(message.kind.clone()))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Handlers
    // ─────────────────────────────────────────────────────────────────────────

    async fn on_credential_issue(&self, message: &Message) -> Result<RouteOutcome> {
        let mut stored = 0;
        for raw in decode_candidates(&message.attachments) {
            let Some(credential) = self.validator.accept(&raw) else {
                continue;
            };
            if !self.secret.owns(&credential.encryption_public_key) {
                tracing::warn!(
                    message_id = %message.id,
                    fingerprint = %credential.encryption_key_fingerprint,
                    "skipping issued credential for an encryption key we do not hold"
                );
                continue;
            }
            let record = StoredCredential::new(CredentialHolder::Own, raw, now_millis());
            self.store.put_credential(&record).await?;
            stored += 1;
        }

        tracing::info!(message_id = %message.id, stored, "credential issue processed");
        Ok(RouteOutcome::CredentialsStored(stored))
    }

    async fn on_presentation_request(&self, message: &Message) -> Result<RouteOutcome> {
        let created_at = if message.timestamp > 0 {
            message.timestamp
        } else {
            now_millis()
        };
        let mut record =
            PresentationRequestRecord::pending(message.id.clone(), message.from.clone(), created_at);

        let resolved = self.hints.resolve(&message.body);
        record.schema_id = resolved.as_ref().map(|(schema, _)| schema.clone());
        self.ledger.record(&record).await?;

        let Some((schema_id, signal)) = resolved else {
            tracing::info!(
                request_id = %message.id,
                peer = %message.from,
                "presentation request names no known schema, needs manual review"
            );
            return Ok(RouteOutcome::NeedsManualReview {
                request_id: message.id.clone(),
            });
        };
        tracing::debug!(request_id = %message.id, %schema_id, %signal, "presentation schema resolved");

        let awaiting = RouteOutcome::AwaitingApproval {
            request_id: message.id.clone(),
            schema_id: schema_id.clone(),
        };
        if !self.config.auto_respond {
            return Ok(awaiting);
        }

        let own = self.store.list_credentials(&CredentialHolder::Own).await?;
        let Some(best) = select_best_credential(&self.validator, &self.secret, &own, &schema_id) else {
            tracing::info!(
                request_id = %message.id,
                %schema_id,
                "no own credential matches requested schema, leaving pending"
            );
            return Ok(awaiting);
        };

        match self.responder.respond(&record, best).await {
            Ok(_) => Ok(RouteOutcome::PresentationResponded {
                request_id: message.id.clone(),
                credential_id: best.id.clone(),
            }),
            Err(e) => {
                tracing::warn!(request_id = %message.id, error = %e, "automatic presentation failed");
                Ok(awaiting)
            }
        }
    }

    async fn on_presentation_response(&self, message: &Message) -> Result<RouteOutcome> {
        let accepted: Vec<_> = decode_candidates(&message.attachments)
            .into_iter()
            .filter(|raw| self.validator.validate(raw))
            .collect();

        if accepted.is_empty() {
            tracing::debug!(message_id = %message.id, from = %message.from, "presentation carried no acceptable credential");
            return Ok(RouteOutcome::PeerCredentialsCached {
                peer: message.from.clone(),
                count: 0,
            });
        }

        if self.superseded(message).await? {
            tracing::info!(
                message_id = %message.id,
                peer = %message.from,
                timestamp = message.timestamp,
                "ignoring presentation older than the cached one"
            );
            return Ok(RouteOutcome::Skipped(SkipReason::Superseded));
        }

        let removed = self
            .store
            .delete_peer_credentials_before(&message.from, i64::MAX)
            .await?;
        let holder = CredentialHolder::Peer(message.from.clone());
        let received_at = now_millis();
        for raw in &accepted {
            self.store
                .put_credential(&StoredCredential::new(holder.clone(), raw.clone(), received_at))
                .await?;
        }

        tracing::info!(
            peer = %message.from,
            cached = accepted.len(),
            replaced = removed,
            "peer credentials cached"
        );
        Ok(RouteOutcome::PeerCredentialsCached {
            peer: message.from.clone(),
            count: accepted.len(),
        })
    }

    async fn on_chat(&self, message: &Message) -> Result<RouteOutcome> {
        let content = match ChatBody::from_value(&message.body) {
            None => ChatContent::Opaque(message.body.clone()),
            Some(body) => match body.envelope_value() {
                Some(value) => self.open_envelope(message, value).await?,
                None => ChatContent::Plain(body.content),
            },
        };

        let chat = InboundChat {
            message_id: message.id.clone(),
            from: message.from.clone(),
            timestamp: message.timestamp,
            content,
        };
        if let Some(sink) = &self.chats {
            if sink.send(chat.clone()).await.is_err() {
                tracing::debug!(message_id = %message.id, "chat receiver dropped");
            }
        }
        Ok(RouteOutcome::Chat(chat))
    }

    async fn open_envelope(&self, message: &Message, value: Value) -> Result<ChatContent> {
        let envelope: EncryptedEnvelope = match serde_json::from_value(value) {
            Ok(env) => env,
            Err(e) => {
                return Ok(ChatContent::Undecryptable {
                    placeholder: "[malformed encrypted message]".to_string(),
                    reason: e.to_string(),
                })
            }
        };
        let placeholder = envelope.placeholder();

        let level = match envelope.level() {
            Ok(level) => level,
            Err(e) => {
                return Ok(ChatContent::Undecryptable {
                    placeholder,
                    reason: e.to_string(),
                })
            }
        };

        let held = self.local_clearance().await?;
        if !held.permits(level) {
            tracing::info!(
                message_id = %message.id,
                %held,
                required = %level,
                "insufficient clearance to read message"
            );
            return Ok(ChatContent::Undecryptable {
                placeholder,
                reason: format!("requires {level} clearance, local clearance is {held}"),
            });
        }

        match decrypt(&envelope, &self.secret) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Ok(ChatContent::Decrypted { text, level }),
                Err(_) => Ok(ChatContent::Undecryptable {
                    placeholder,
                    reason: "plaintext is not UTF-8".to_string(),
                }),
            },
            Err(e) => {
                tracing::debug!(message_id = %message.id, error = %e, "decryption failed");
                Ok(ChatContent::Undecryptable {
                    placeholder,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Whether a newer acceptable presentation from the same peer already
    /// backs the cached credentials. Unstamped messages are never older.
    async fn superseded(&self, message: &Message) -> Result<bool> {
        if message.timestamp == 0 {
            return Ok(false);
        }
        let holder = CredentialHolder::Peer(message.from.clone());
        if self.store.list_credentials(&holder).await?.is_empty() {
            return Ok(false);
        }

        let filter = MessageFilter::received(MessageKind::PresentationResponse, message.from.clone());
        let newer = self.store.list_messages(&filter).await?.into_iter().any(|other| {
            other.id != message.id
                && other.timestamp > message.timestamp
                && decode_candidates(&other.attachments)
                    .iter()
                    .any(|raw| self.validator.validate(raw))
        });
        Ok(newer)
    }

    /// Highest clearance among our validated credentials for our own key.
    async fn local_clearance(&self) -> Result<ClearanceLevel> {
        let own = self.store.list_credentials(&CredentialHolder::Own).await?;
        Ok(own
            .iter()
            .filter(|c| holds_key(&self.validator, &self.secret, c))
            .filter_map(|c| self.validator.accept(&c.raw))
            .map(|c| c.clearance_level)
            .max()
            .unwrap_or(ClearanceLevel::Unclassified))
    }
}
