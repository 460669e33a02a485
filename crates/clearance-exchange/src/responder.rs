//! Answering presentation requests.
//!
//! A response carries one of our own credentials in the request's thread.
//! Compact credentials travel as the original token so the issuer signature
//! survives; JSON credentials travel as a JSON attachment.

use std::sync::Arc;

use clearance_cipher::X25519StaticSecret;
use clearance_core::{
    Attachment, CredentialFormat, CredentialHolder, CredentialShape, CredentialValidator,
    Message, MessageId, MessageKind, PresentationRequestRecord, PresentationStatus,
    StoredCredential,
};
use clearance_store::MessageStore;
use serde_json::json;

use crate::error::{ExchangeError, LedgerError, Result};
use crate::ledger::PresentationLedger;
use crate::transport::Transport;

/// Attachment format identifier for presentation submissions.
pub const SUBMISSION_FORMAT: &str = "dif/presentation-exchange/submission@v1.0";

/// Whether `credential` publishes the public half of `secret`.
pub fn holds_key(
    validator: &CredentialValidator,
    secret: &X25519StaticSecret,
    credential: &StoredCredential,
) -> bool {
    validator
        .extract_key_material(&credential.raw)
        .map_or(false, |key| secret.owns(&key.public_key))
}

/// Pick the own credential to present for `schema_id`.
///
/// Candidates must be ours, issued under the schema, carry complete
/// clearance fields and publish the key `secret` opens. The highest
/// clearance wins; ties go to the newest.
pub fn select_best_credential<'a>(
    validator: &CredentialValidator,
    secret: &X25519StaticSecret,
    credentials: &'a [StoredCredential],
    schema_id: &str,
) -> Option<&'a StoredCredential> {
    credentials
        .iter()
        .filter(|c| c.holder == CredentialHolder::Own)
        .filter(|c| c.raw.schema_id().as_deref() == Some(schema_id))
        .filter(|c| holds_key(validator, secret, c))
        .filter(|c| {
            CredentialShape::classify(&c.raw.document)
                .claims(&c.raw.document)
                .is_complete()
        })
        .max_by_key(|c| (validator.clearance_level(&c.raw), c.received_at))
}

/// Sends presentation responses and resolves their ledger entries.
pub struct PresentationResponder<S: ?Sized, T: ?Sized> {
    store: Arc<S>,
    transport: Arc<T>,
    ledger: PresentationLedger<S>,
}

impl<S: ?Sized, T: ?Sized> Clone for PresentationResponder<S, T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            ledger: self.ledger.clone(),
        }
    }
}

impl<S, T> PresentationResponder<S, T>
where
    S: MessageStore + ?Sized,
    T: Transport + ?Sized,
{
    pub fn new(store: Arc<S>, transport: Arc<T>) -> Self {
        Self {
            ledger: PresentationLedger::new(Arc::clone(&store)),
            store,
            transport,
        }
    }

    /// Present `credential` in answer to `request` and mark it `Sent`.
    ///
    /// Nothing is sent unless the request is still pending. If delivery
    /// fails the request stays pending.
    pub async fn respond(
        &self,
        request: &PresentationRequestRecord,
        credential: &StoredCredential,
    ) -> Result<MessageId> {
        let current = self
            .ledger
            .get(&request.id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(request.id.clone()))?;
        if current.status != PresentationStatus::Pending {
            return Err(ExchangeError::Ledger(LedgerError::InvalidTransition {
                id: request.id.clone(),
                from: current.status,
                to: PresentationStatus::Sent,
            }));
        }

        let response = Message::outbound(
            MessageKind::PresentationResponse,
            self.transport.local_did().clone(),
            current.peer.clone(),
            json!({"comment": "clearance credential presentation"}),
        )
        .in_thread(request.id.clone())
        .with_attachment(presentation_attachment(credential));

        self.transport.send(&response).await?;
        self.store.insert_message(&response).await?;
        self.ledger.mark_sent(&request.id).await?;

        tracing::info!(
            request_id = %request.id,
            peer = %current.peer,
            credential_id = %credential.id,
            "presentation sent"
        );
        Ok(response.id)
    }
}

fn presentation_attachment(credential: &StoredCredential) -> Attachment {
    let raw = &credential.raw;
    let attachment = match (&raw.encoded, raw.format) {
        (Some(token), CredentialFormat::SdJwt) => Attachment::base64(token, "application/sd-jwt"),
        (Some(token), _) => Attachment::base64(token, "application/jwt"),
        (None, _) => Attachment::json(raw.document.clone()),
    };
    attachment.with_format(SUBMISSION_FORMAT)
}
