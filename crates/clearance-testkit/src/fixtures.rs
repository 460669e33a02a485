//! Test fixtures and helpers.
//!
//! A [`TestIssuer`] signs clearance credentials for [`TestParty`] subjects in
//! every format and subject layout the validator understands.

use clearance_cipher::X25519StaticSecret;
use clearance_core::{
    encode_base64url, Attachment, ClearanceLevel, ConnectionDid, Direction, EncryptionPublicKey,
    IssuerVerifyingKey, KeyFingerprint, Message, MessageId, MessageKind, RawCredential, Did,
    TrustPolicy, TrustedIssuer,
};
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Schema id every fixture credential is issued under.
pub const CLEARANCE_SCHEMA: &str = "https://schemas.clearance.test/security-clearance/v1";

/// Where a credential puts its clearance fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectLayout {
    /// Flat on `credentialSubject`.
    Legacy,
    /// `credentialSubject.claims` as `[{name, value}]`.
    ClaimsArray,
    /// Flat on the alternate `subject` object.
    SubjectObject,
}

/// The subject side of a clearance credential.
#[derive(Debug, Clone)]
pub struct ClearanceSubject {
    pub id: Did,
    pub level: ClearanceLevel,
    pub public_key: EncryptionPublicKey,
}

impl ClearanceSubject {
    fn fields(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("clearanceLevel", json!(self.level.label())),
            ("encryptionPublicKey", json!(self.public_key.to_base64url())),
            (
                "encryptionKeyFingerprint",
                json!(KeyFingerprint::of(&self.public_key).as_str()),
            ),
        ]
    }

    fn subject_value(&self, layout: SubjectLayout) -> Value {
        match layout {
            SubjectLayout::Legacy | SubjectLayout::SubjectObject => {
                let mut obj = serde_json::Map::new();
                obj.insert("id".into(), json!(self.id.as_str()));
                for (name, value) in self.fields() {
                    obj.insert(name.into(), value);
                }
                Value::Object(obj)
            }
            SubjectLayout::ClaimsArray => {
                let claims: Vec<Value> = self
                    .fields()
                    .into_iter()
                    .map(|(name, value)| json!({"name": name, "value": value}))
                    .collect();
                json!({"id": self.id.as_str(), "claims": claims})
            }
        }
    }
}

/// A credential issuer with an Ed25519 signing key.
pub struct TestIssuer {
    pub did: Did,
    signing_key: SigningKey,
}

impl std::fmt::Debug for TestIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestIssuer")
            .field("did", &self.did)
            .field("verifying_key", &hex::encode(self.signing_key.verifying_key().as_bytes()))
            .finish()
    }
}

impl TestIssuer {
    /// Create an issuer with a random key.
    pub fn new(did: &str) -> Self {
        Self {
            did: Did::new(did),
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Create an issuer with a deterministic key.
    pub fn with_seed(did: &str, seed: [u8; 32]) -> Self {
        Self {
            did: Did::new(did),
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn verifying_key(&self) -> IssuerVerifyingKey {
        IssuerVerifyingKey(self.signing_key.verifying_key())
    }

    /// Trust entry that requires this issuer's signature.
    pub fn trusted(&self) -> TrustedIssuer {
        TrustedIssuer::new(self.did.clone()).with_verifying_key(self.verifying_key())
    }

    /// Trust entry with no pinned key, for unsigned JSON credentials.
    pub fn trusted_unsigned(&self) -> TrustedIssuer {
        TrustedIssuer::new(self.did.clone())
    }

    /// A policy trusting only this issuer for [`CLEARANCE_SCHEMA`].
    pub fn policy(&self) -> TrustPolicy {
        TrustPolicy::new([self.trusted()], [CLEARANCE_SCHEMA])
    }

    /// A signed JWT-VC.
    pub fn jwt(&self, subject: &ClearanceSubject, layout: SubjectLayout) -> String {
        let (subject_key, subject_value) = match layout {
            SubjectLayout::SubjectObject => ("subject", subject.subject_value(layout)),
            _ => ("credentialSubject", subject.subject_value(layout)),
        };
        let payload = json!({
            "iss": self.did.as_str(),
            "sub": subject.id.as_str(),
            "iat": 1_700_000_000,
            "vc": {
                "@context": ["https://www.w3.org/2018/credentials/v1"],
                "type": ["VerifiableCredential", "SecurityClearanceCredential"],
                "credentialSchema": {"id": CLEARANCE_SCHEMA, "type": "JsonSchema"},
                subject_key: subject_value,
            }
        });
        self.sign_compact(&payload)
    }

    /// A signed SD-JWT disclosing every clearance field.
    pub fn sd_jwt(&self, subject: &ClearanceSubject) -> String {
        let disclosures: Vec<String> = subject
            .fields()
            .into_iter()
            .map(|(name, value)| {
                let mut salt = [0u8; 16];
                OsRng.fill_bytes(&mut salt);
                let disclosure = json!([hex::encode(salt), name, value]);
                encode_base64url(disclosure.to_string().as_bytes())
            })
            .collect();
        let digests: Vec<String> = disclosures
            .iter()
            .map(|d| encode_base64url(&Sha256::digest(d.as_bytes())))
            .collect();

        let payload = json!({
            "iss": self.did.as_str(),
            "sub": subject.id.as_str(),
            "vct": CLEARANCE_SCHEMA,
            "_sd": digests,
            "_sd_alg": "sha-256",
        });
        format!("{}~{}~", self.sign_compact(&payload), disclosures.join("~"))
    }

    /// An unsigned JSON credential. Only validates against
    /// [`TestIssuer::trusted_unsigned`].
    pub fn json(&self, subject: &ClearanceSubject, layout: SubjectLayout) -> Value {
        let subject_key = match layout {
            SubjectLayout::SubjectObject => "subject",
            _ => "credentialSubject",
        };
        json!({
            "@context": ["https://www.w3.org/2018/credentials/v1"],
            "type": ["VerifiableCredential", "SecurityClearanceCredential"],
            "issuer": {"id": self.did.as_str()},
            "credentialSchema": {"id": CLEARANCE_SCHEMA, "type": "JsonSchema"},
            subject_key: subject.subject_value(layout),
        })
    }

    /// Mint and decode a signed JWT credential.
    pub fn issue(&self, subject: &ClearanceSubject) -> RawCredential {
        RawCredential::from_jwt(&self.jwt(subject, SubjectLayout::Legacy))
            .expect("fixture JWT decodes")
    }

    fn sign_compact(&self, payload: &Value) -> String {
        let header = json!({"alg": "EdDSA", "typ": "JWT"});
        let signing_input = format!(
            "{}.{}",
            encode_base64url(header.to_string().as_bytes()),
            encode_base64url(payload.to_string().as_bytes())
        );
        let signature = self.signing_key.sign(signing_input.as_bytes());
        format!("{signing_input}.{}", encode_base64url(&signature.to_bytes()))
    }
}

/// One side of a conversation.
pub struct TestParty {
    /// The DID credentials are issued to.
    pub did: Did,
    /// The pairwise DID messages are addressed to.
    pub connection_did: ConnectionDid,
    pub secret: X25519StaticSecret,
}

impl TestParty {
    /// `did:example:<name>` receiving at `did:peer:<name>`.
    pub fn new(name: &str) -> Self {
        Self {
            did: Did::new(format!("did:example:{name}")),
            connection_did: ConnectionDid::new(format!("did:peer:{name}")),
            secret: X25519StaticSecret::generate(),
        }
    }

    pub fn public_key(&self) -> EncryptionPublicKey {
        self.secret.public_key()
    }

    /// This party as a credential subject at `level`.
    pub fn subject(&self, level: ClearanceLevel) -> ClearanceSubject {
        ClearanceSubject {
            id: self.did.clone(),
            level,
            public_key: self.public_key(),
        }
    }

    /// Replace the encryption secret, returning the old one.
    pub fn rotate_key(&mut self) -> X25519StaticSecret {
        std::mem::replace(&mut self.secret, X25519StaticSecret::generate())
    }
}

/// An attachment carrying `raw` the way a peer would send it.
pub fn credential_attachment(raw: &RawCredential) -> Attachment {
    match &raw.encoded {
        Some(token) => Attachment::base64(token, "application/jwt"),
        None => Attachment::json(raw.document.clone()),
    }
}

/// A received message of `kind` from `from` to `to`.
pub fn received(
    kind: MessageKind,
    from: &ConnectionDid,
    to: &ConnectionDid,
    body: Value,
    timestamp: i64,
) -> Message {
    let mut msg = Message::outbound(kind, from.clone(), to.clone(), body);
    msg.direction = Direction::Received;
    msg.timestamp = timestamp;
    msg
}

/// A received presentation response carrying `raw`.
pub fn presentation_response(
    from: &ConnectionDid,
    to: &ConnectionDid,
    raw: &RawCredential,
    timestamp: i64,
) -> Message {
    received(MessageKind::PresentationResponse, from, to, json!({}), timestamp)
        .with_attachment(credential_attachment(raw))
}

/// A received presentation request with the given body.
pub fn presentation_request(
    id: &str,
    from: &ConnectionDid,
    to: &ConnectionDid,
    body: Value,
) -> Message {
    let mut msg = received(MessageKind::PresentationRequest, from, to, body, 0);
    msg.id = MessageId::new(id);
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearance_core::{CredentialFormat, CredentialValidator};

    #[test]
    fn test_every_format_validates() {
        let issuer = TestIssuer::new("did:web:issuer.test");
        let alice = TestParty::new("alice");
        let subject = alice.subject(ClearanceLevel::Secret);
        let validator = CredentialValidator::new(issuer.policy());

        for layout in [
            SubjectLayout::Legacy,
            SubjectLayout::ClaimsArray,
            SubjectLayout::SubjectObject,
        ] {
            let raw = RawCredential::from_jwt(&issuer.jwt(&subject, layout)).unwrap();
            let cred = validator.check(&raw).unwrap();
            assert_eq!(cred.clearance_level, ClearanceLevel::Secret);
            assert_eq!(cred.encryption_public_key, alice.public_key());
        }

        let raw = RawCredential::from_sd_jwt(&issuer.sd_jwt(&subject)).unwrap();
        assert_eq!(raw.format, CredentialFormat::SdJwt);
        assert!(validator.validate(&raw));
    }

    #[test]
    fn test_json_needs_unsigned_trust() {
        let issuer = TestIssuer::new("did:web:issuer.test");
        let subject = TestParty::new("bob").subject(ClearanceLevel::Internal);
        let raw = RawCredential::from_json(&issuer.json(&subject, SubjectLayout::Legacy)).unwrap();

        assert!(!CredentialValidator::new(issuer.policy()).validate(&raw));

        let policy = TrustPolicy::new([issuer.trusted_unsigned()], [CLEARANCE_SCHEMA]);
        assert!(CredentialValidator::new(policy).validate(&raw));
    }

    #[test]
    fn test_rotate_key() {
        let mut party = TestParty::new("carol");
        let before = party.public_key();
        let old = party.rotate_key();
        assert_eq!(old.public_key(), before);
        assert_ne!(party.public_key(), before);
    }
}
