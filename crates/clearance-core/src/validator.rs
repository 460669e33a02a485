//! Credential validation.
//!
//! The validator is the only place a [`RawCredential`] becomes a
//! [`Credential`]. It is a pure function of the decoded document and the
//! [`TrustPolicy`]: no I/O, no caching, safe to share between tasks.
//!
//! Rejections never propagate as errors. Callers treat "not validated" as
//! "credential absent"; the reason is only logged.

use std::fmt;

use crate::clearance::ClearanceLevel;
use crate::credential::{Credential, RawCredential};
use crate::crypto::{EncryptionPublicKey, KeyFingerprint, KeyMaterial};
use crate::shape::{ClearanceClaims, CredentialShape};
use crate::trust::TrustPolicy;
use crate::types::Did;

/// Why a credential was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingIssuer,
    UntrustedIssuer(Did),
    MissingSchema,
    SchemaNotAllowed(String),
    UnsignedFromKeyedIssuer,
    UnsupportedAlgorithm(String),
    BadSignature,
    UnrecognizedShape,
    MissingField(&'static str),
    InvalidKey,
    FingerprintMismatch,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingIssuer => f.write_str("credential declares no issuer"),
            Rejection::UntrustedIssuer(did) => write!(f, "issuer {did} is not trusted"),
            Rejection::MissingSchema => f.write_str("credential declares no schema"),
            Rejection::SchemaNotAllowed(s) => write!(f, "schema {s} is not a clearance schema"),
            Rejection::UnsignedFromKeyedIssuer => {
                f.write_str("issuer requires signed credentials but none was presented")
            }
            Rejection::UnsupportedAlgorithm(alg) => write!(f, "unsupported signature alg {alg}"),
            Rejection::BadSignature => f.write_str("issuer signature does not verify"),
            Rejection::UnrecognizedShape => f.write_str("no known clearance layout"),
            Rejection::MissingField(name) => write!(f, "missing field {name}"),
            Rejection::InvalidKey => f.write_str("encryption key is malformed"),
            Rejection::FingerprintMismatch => f.write_str("fingerprint does not match key"),
        }
    }
}

/// Validates clearance credentials against a trust policy.
#[derive(Debug, Clone, Default)]
pub struct CredentialValidator {
    policy: TrustPolicy,
}

impl CredentialValidator {
    /// Create a validator for `policy`.
    pub fn new(policy: TrustPolicy) -> Self {
        Self { policy }
    }

    /// The policy in force.
    pub fn policy(&self) -> &TrustPolicy {
        &self.policy
    }

    /// Whether `raw` is usable as identity proof.
    pub fn validate(&self, raw: &RawCredential) -> bool {
        self.check(raw).is_ok()
    }

    /// Validate and return the trusted view, or `None`.
    pub fn accept(&self, raw: &RawCredential) -> Option<Credential> {
        match self.check(raw) {
            Ok(credential) => Some(credential),
            Err(reason) => {
                tracing::debug!(format = ?raw.format, %reason, "credential rejected");
                None
            }
        }
    }

    /// Clearance level declared by the document.
    ///
    /// This is extraction only and implies no trust. An unknown layout or
    /// unparseable level reads as `Unclassified`.
    pub fn clearance_level(&self, raw: &RawCredential) -> ClearanceLevel {
        let shape = CredentialShape::classify(&raw.document);
        shape
            .claims(&raw.document)
            .clearance_level
            .unwrap_or(ClearanceLevel::Unclassified)
    }

    /// Encryption key and its fingerprint, if present, well formed and consistent.
    pub fn extract_key_material(&self, raw: &RawCredential) -> Option<KeyMaterial> {
        let shape = CredentialShape::classify(&raw.document);
        key_material(&shape.claims(&raw.document)).ok()
    }

    /// Full validation, reporting the first failed check.
    pub fn check(&self, raw: &RawCredential) -> Result<Credential, Rejection> {
        let issuer = raw.issuer().ok_or(Rejection::MissingIssuer)?;
        let trusted = self
            .policy
            .issuer(&issuer)
            .ok_or_else(|| Rejection::UntrustedIssuer(issuer.clone()))?;

        let schema_id = raw.schema_id().ok_or(Rejection::MissingSchema)?;
        if !self.policy.is_clearance_schema(&schema_id) {
            return Err(Rejection::SchemaNotAllowed(schema_id));
        }

        if let Some(key) = &trusted.verifying_key {
            let proof = raw.proof.as_ref().ok_or(Rejection::UnsignedFromKeyedIssuer)?;
            if proof.alg != "EdDSA" && proof.alg != "Ed25519" {
                return Err(Rejection::UnsupportedAlgorithm(proof.alg.clone()));
            }
            if !key.verify(proof.signing_input.as_bytes(), &proof.signature) {
                return Err(Rejection::BadSignature);
            }
        }

        let shape = CredentialShape::classify(&raw.document);
        if !shape.is_recognized() {
            return Err(Rejection::UnrecognizedShape);
        }
        let claims = shape.claims(&raw.document);
        let clearance_level = claims
            .clearance_level
            .ok_or(Rejection::MissingField(crate::shape::FIELD_CLEARANCE_LEVEL))?;
        let material = key_material(&claims)?;

        Ok(Credential {
            issuer,
            subject_id: claims.subject_id.map(Did::new),
            clearance_level,
            encryption_public_key: material.public_key,
            encryption_key_fingerprint: material.fingerprint,
            signing_public_key: claims.signing_public_key,
            schema_id,
            format: raw.format,
        })
    }
}

fn key_material(claims: &ClearanceClaims) -> Result<KeyMaterial, Rejection> {
    let encoded = claims
        .encryption_public_key
        .as_deref()
        .ok_or(Rejection::MissingField(crate::shape::FIELD_ENCRYPTION_KEY))?;
    let fingerprint = claims
        .fingerprint
        .as_deref()
        .ok_or(Rejection::MissingField(crate::shape::FIELD_FINGERPRINT))?;

    let public_key =
        EncryptionPublicKey::from_base64url(encoded).map_err(|_| Rejection::InvalidKey)?;
    let fingerprint =
        KeyFingerprint::parse(fingerprint).map_err(|_| Rejection::FingerprintMismatch)?;
    if !fingerprint.matches(&public_key) {
        return Err(Rejection::FingerprintMismatch);
    }

    Ok(KeyMaterial {
        public_key,
        fingerprint,
    })
}
