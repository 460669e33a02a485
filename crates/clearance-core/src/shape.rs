//! Credential subject layouts.
//!
//! Clearance credentials have been issued under several schema revisions that
//! put the same fields in different places. Each layout gets an explicit tag
//! and its own parser; a document that matches none of them is
//! [`CredentialShape::Unrecognized`] and yields nothing.

use serde_json::{Map, Value};

use crate::clearance::ClearanceLevel;

pub const FIELD_CLEARANCE_LEVEL: &str = "clearanceLevel";
pub const FIELD_ENCRYPTION_KEY: &str = "encryptionPublicKey";
pub const FIELD_FINGERPRINT: &str = "encryptionKeyFingerprint";
pub const FIELD_SIGNING_KEY: &str = "signingPublicKey";

/// Where a document keeps its clearance fields.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialShape<'a> {
    /// Fields sit directly on `credentialSubject`.
    Legacy(&'a Map<String, Value>),
    /// `credentialSubject.claims` is a `[{name, value}]` array.
    ClaimsArray(&'a [Value]),
    /// Fields sit on the alternate `subject` object.
    SubjectObject(&'a Map<String, Value>),
    Unrecognized,
}

/// Clearance fields read out of a recognized shape, still as raw strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearanceClaims {
    pub subject_id: Option<String>,
    pub clearance_level: Option<ClearanceLevel>,
    pub encryption_public_key: Option<String>,
    pub fingerprint: Option<String>,
    pub signing_public_key: Option<String>,
}

impl ClearanceClaims {
    /// Whether every field a clearance credential needs is present.
    pub fn is_complete(&self) -> bool {
        self.clearance_level.is_some()
            && self.encryption_public_key.is_some()
            && self.fingerprint.is_some()
    }
}

impl<'a> CredentialShape<'a> {
    /// Classify a normalized credential document.
    pub fn classify(document: &'a Value) -> Self {
        let subject = document.get("credentialSubject").and_then(Value::as_object);

        if let Some(subject) = subject {
            if subject.contains_key(FIELD_CLEARANCE_LEVEL) {
                return CredentialShape::Legacy(subject);
            }
            if let Some(claims) = subject.get("claims").and_then(Value::as_array) {
                return CredentialShape::ClaimsArray(claims);
            }
        }

        if let Some(alt) = document.get("subject").and_then(Value::as_object) {
            if alt.contains_key(FIELD_CLEARANCE_LEVEL) {
                return CredentialShape::SubjectObject(alt);
            }
        }

        CredentialShape::Unrecognized
    }

    /// Stable tag name, for logs.
    pub fn tag(&self) -> &'static str {
        match self {
            CredentialShape::Legacy(_) => "legacy",
            CredentialShape::ClaimsArray(_) => "claims-array",
            CredentialShape::SubjectObject(_) => "subject-object",
            CredentialShape::Unrecognized => "unrecognized",
        }
    }

    /// Whether the document is clearance-shaped at all.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, CredentialShape::Unrecognized)
    }

    /// Read clearance fields using this shape's parser.
    pub fn claims(&self, document: &Value) -> ClearanceClaims {
        match self {
            CredentialShape::Legacy(subject) | CredentialShape::SubjectObject(subject) => {
                parse_object(subject)
            }
            CredentialShape::ClaimsArray(entries) => {
                let mut claims = parse_claims_array(entries);
                claims.subject_id = document
                    .get("credentialSubject")
                    .and_then(|s| s.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                claims
            }
            CredentialShape::Unrecognized => ClearanceClaims::default(),
        }
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_object(subject: &Map<String, Value>) -> ClearanceClaims {
    ClearanceClaims {
        subject_id: string_field(subject, "id"),
        clearance_level: subject
            .get(FIELD_CLEARANCE_LEVEL)
            .and_then(ClearanceLevel::from_json),
        encryption_public_key: string_field(subject, FIELD_ENCRYPTION_KEY),
        fingerprint: string_field(subject, FIELD_FINGERPRINT),
        signing_public_key: string_field(subject, FIELD_SIGNING_KEY),
    }
}

fn parse_claims_array(entries: &[Value]) -> ClearanceClaims {
    let mut claims = ClearanceClaims::default();
    for entry in entries {
        let Some(name) = entry.get("name").and_then(Value::as_str) else {
            continue;
        };
        let Some(value) = entry.get("value") else {
            continue;
        };
        let text = value.as_str().map(str::trim).filter(|s| !s.is_empty());
        match name {
            FIELD_CLEARANCE_LEVEL => claims.clearance_level = ClearanceLevel::from_json(value),
            FIELD_ENCRYPTION_KEY => claims.encryption_public_key = text.map(str::to_string),
            FIELD_FINGERPRINT => claims.fingerprint = text.map(str::to_string),
            FIELD_SIGNING_KEY => claims.signing_public_key = text.map(str::to_string),
            _ => {}
        }
    }
    claims
}
