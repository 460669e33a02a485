//! Message records and protocol classification.
//!
//! Messages are what the transport delivers and the message store keeps.
//! The protocol type URI decides the [`MessageKind`]; the body and
//! attachments stay as JSON until a handler for that kind interprets them.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::types::{now_millis, ConnectionDid, Did, MessageId};

const DIDCOMM_PREFIX: &str = "https://didcomm.org/";

/// Which side of the transport a stored message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Received,
    Sent,
}

/// Protocol classification of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    CredentialOffer,
    CredentialIssue,
    PresentationRequest,
    PresentationResponse,
    ConnectionRequest,
    Chat,
    /// A protocol this agent does not handle. Keeps the original URI.
    Unknown(String),
}

impl MessageKind {
    /// Classify a protocol type URI.
    ///
    /// Only the protocol and message names are significant; the host prefix
    /// (`https://didcomm.org/` or the legacy `did:sov:...;spec/`) and the
    /// protocol version are ignored.
    pub fn classify(type_uri: &str) -> Self {
        let mut segments = type_uri.trim_end_matches('/').rsplit('/');
        let name = segments.next().unwrap_or_default();
        let _version = segments.next();
        let protocol = segments.next().unwrap_or_default();

        match (protocol, name) {
            ("issue-credential", "offer-credential") => MessageKind::CredentialOffer,
            ("issue-credential", "issue-credential") => MessageKind::CredentialIssue,
            ("present-proof", "request-presentation") => MessageKind::PresentationRequest,
            ("present-proof", "presentation") => MessageKind::PresentationResponse,
            ("didexchange", "request") | ("connections", "request") => {
                MessageKind::ConnectionRequest
            }
            ("basicmessage", "message") => MessageKind::Chat,
            _ => MessageKind::Unknown(type_uri.to_string()),
        }
    }

    /// The type URI this agent emits for the kind.
    pub fn type_uri(&self) -> &str {
        match self {
            MessageKind::CredentialOffer => "https://didcomm.org/issue-credential/3.0/offer-credential",
            MessageKind::CredentialIssue => "https://didcomm.org/issue-credential/3.0/issue-credential",
            MessageKind::PresentationRequest => {
                "https://didcomm.org/present-proof/3.0/request-presentation"
            }
            MessageKind::PresentationResponse => "https://didcomm.org/present-proof/3.0/presentation",
            MessageKind::ConnectionRequest => "https://didcomm.org/didexchange/1.1/request",
            MessageKind::Chat => "https://didcomm.org/basicmessage/2.0/message",
            MessageKind::Unknown(uri) => uri,
        }
    }

    /// Whether the URI is a didcomm.org protocol.
    pub fn is_didcomm(&self) -> bool {
        self.type_uri().starts_with(DIDCOMM_PREFIX)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_uri())
    }
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.type_uri())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let uri = String::deserialize(deserializer)?;
        Ok(Self::classify(&uri))
    }
}

/// Attachment payload. Exactly one field is normally set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
}

/// A message attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Attachment format identifier, e.g. `dif/presentation-exchange/submission@v1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub data: AttachmentData,
}

impl Attachment {
    /// A JSON attachment.
    pub fn json(value: Value) -> Self {
        Self {
            id: None,
            media_type: Some("application/json".into()),
            format: None,
            data: AttachmentData {
                base64: None,
                json: Some(value),
            },
        }
    }

    /// A base64url attachment holding the given text (e.g. a JWT).
    pub fn base64(text: &str, media_type: &str) -> Self {
        Self {
            id: None,
            media_type: Some(media_type.into()),
            format: None,
            data: AttachmentData {
                base64: Some(crate::crypto::encode_base64url(text.as_bytes())),
                json: None,
            },
        }
    }

    /// Set the format identifier.
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// A message as the transport and the message store see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<MessageId>,
    pub from: ConnectionDid,
    pub to: ConnectionDid,
    pub direction: Direction,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Creation time in Unix ms. Zero when the sender supplied none.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub body: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// A new outbound message stamped with the current time.
    pub fn outbound(kind: MessageKind, from: ConnectionDid, to: ConnectionDid, body: Value) -> Self {
        Self {
            id: MessageId::generate(),
            thread_id: None,
            from,
            to,
            direction: Direction::Sent,
            kind,
            timestamp: now_millis(),
            body,
            attachments: Vec::new(),
        }
    }

    /// Set the thread this message replies in.
    pub fn in_thread(mut self, thread_id: MessageId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Append an attachment.
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// The copy of this message a recipient stores.
    pub fn as_received(&self) -> Self {
        Self {
            direction: Direction::Received,
            ..self.clone()
        }
    }
}

/// State of an inbound presentation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentationStatus {
    Pending,
    Sent,
    Declined,
}

impl PresentationStatus {
    /// Whether no further transition is allowed.
    pub fn is_terminal(self) -> bool {
        !matches!(self, PresentationStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PresentationStatus::Pending => "pending",
            PresentationStatus::Sent => "sent",
            PresentationStatus::Declined => "declined",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PresentationStatus::Pending),
            "sent" => Some(PresentationStatus::Sent),
            "declined" => Some(PresentationStatus::Declined),
            _ => None,
        }
    }
}

impl fmt::Display for PresentationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound presentation request and what was done about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationRequestRecord {
    /// Id of the request message.
    pub id: MessageId,
    pub peer: ConnectionDid,
    pub status: PresentationStatus,
    pub created_at: i64,
    /// Schema the request was resolved to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
}

impl PresentationRequestRecord {
    /// A pending record for a request received from `peer`.
    pub fn pending(id: MessageId, peer: ConnectionDid, created_at: i64) -> Self {
        Self {
            id,
            peer,
            status: PresentationStatus::Pending,
            created_at,
            schema_id: None,
        }
    }
}

/// An established pairing between a peer identity and its connection DID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub peer: Did,
    pub connection_did: ConnectionDid,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_ignores_version_and_prefix() {
        assert_eq!(
            MessageKind::classify("https://didcomm.org/present-proof/2.0/request-presentation"),
            MessageKind::PresentationRequest
        );
        assert_eq!(
            MessageKind::classify("https://didcomm.org/present-proof/3.0/presentation"),
            MessageKind::PresentationResponse
        );
        assert_eq!(
            MessageKind::classify("did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/basicmessage/1.0/message"),
            MessageKind::Chat
        );
        assert_eq!(
            MessageKind::classify("https://didcomm.org/issue-credential/2.0/issue-credential"),
            MessageKind::CredentialIssue
        );
        assert_eq!(
            MessageKind::classify("https://didcomm.org/connections/1.0/request"),
            MessageKind::ConnectionRequest
        );
    }

    #[test]
    fn test_unknown_kind_keeps_uri() {
        let uri = "https://didcomm.org/trust-ping/2.0/ping";
        assert_eq!(MessageKind::classify(uri), MessageKind::Unknown(uri.into()));
        assert_eq!(MessageKind::classify(uri).type_uri(), uri);
    }

    #[test]
    fn test_emitted_uris_classify_back() {
        for kind in [
            MessageKind::CredentialOffer,
            MessageKind::CredentialIssue,
            MessageKind::PresentationRequest,
            MessageKind::PresentationResponse,
            MessageKind::ConnectionRequest,
            MessageKind::Chat,
        ] {
            assert_eq!(MessageKind::classify(kind.type_uri()), kind);
            assert!(kind.is_didcomm());
        }
    }

    #[test]
    fn test_message_json_uses_type_uri() {
        let msg = Message::outbound(
            MessageKind::Chat,
            ConnectionDid::new("did:peer:a"),
            ConnectionDid::new("did:peer:b"),
            json!({"content": "hi"}),
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "https://didcomm.org/basicmessage/2.0/message");
        assert_eq!(json["direction"], "sent");

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_missing_timestamp_reads_as_zero() {
        let msg: Message = serde_json::from_value(json!({
            "id": "m1",
            "from": "did:peer:a",
            "to": "did:peer:b",
            "direction": "received",
            "type": "https://didcomm.org/present-proof/2.0/presentation"
        }))
        .unwrap();
        assert_eq!(msg.timestamp, 0);
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn test_presentation_status_terminal() {
        assert!(!PresentationStatus::Pending.is_terminal());
        assert!(PresentationStatus::Sent.is_terminal());
        assert!(PresentationStatus::Declined.is_terminal());
        assert_eq!(PresentationStatus::parse("declined"), Some(PresentationStatus::Declined));
        assert_eq!(PresentationStatus::parse("bogus"), None);
    }
}
