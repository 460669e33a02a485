//! Credential formats.
//!
//! Peers present credentials in one of three encodings. Each decoder turns
//! its encoding into a [`RawCredential`] whose `document` is normalized to the
//! W3C VC layout (`issuer`, `credentialSchema`/`schemaId`, subject data), so
//! the validator only has to understand one document model.
//!
//! A `RawCredential` is untrusted. Only [`crate::CredentialValidator::accept`]
//! turns one into a [`Credential`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::clearance::ClearanceLevel;
use crate::crypto::{decode_base64url, encode_base64url, EncryptionPublicKey, KeyFingerprint};
use crate::error::{CoreError, Result};
use crate::types::{ConnectionDid, Did};

/// Separator between the issuer JWT and disclosures in an SD-JWT.
const SD_JWT_SEPARATOR: char = '~';

/// Registered JWT claims that never belong to the credential subject.
const REGISTERED_CLAIMS: &[&str] = &[
    "iss", "sub", "aud", "iat", "nbf", "exp", "jti", "vct", "cnf", "status", "_sd", "_sd_alg",
];

/// Encoding a credential arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialFormat {
    /// JWS compact serialization carrying a `vc` claim.
    Jwt,
    /// Selective-disclosure JWT (`<jwt>~<disclosure>~...`).
    SdJwt,
    /// Plain JSON verifiable credential.
    Json,
}

/// The detached signature of a JWS-encoded credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwsProof {
    /// The `alg` header value.
    pub alg: String,
    /// `base64url(header) || '.' || base64url(payload)`.
    pub signing_input: String,
    /// Raw signature bytes.
    pub signature: Vec<u8>,
}

/// A decoded credential that has not been validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCredential {
    pub format: CredentialFormat,
    pub document: Value,
    pub proof: Option<JwsProof>,
    /// The compact token as received, for JWT and SD-JWT credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded: Option<String>,
}

impl RawCredential {
    /// Decode a JWT-VC.
    pub fn from_jwt(token: &str) -> Result<Self> {
        let jws = CompactJws::parse(token.trim())?;

        let document = match jws.payload.get("vc") {
            Some(Value::Object(vc)) => {
                let mut doc = vc.clone();
                if !doc.contains_key("issuer") {
                    if let Some(iss) = jws.payload.get("iss") {
                        doc.insert("issuer".into(), iss.clone());
                    }
                }
                if let (Some(sub), Some(Value::Object(subject))) =
                    (jws.payload.get("sub"), doc.get_mut("credentialSubject"))
                {
                    subject.entry("id").or_insert_with(|| sub.clone());
                }
                Value::Object(doc)
            }
            _ if jws.payload.contains_key("credentialSubject") => {
                Value::Object(jws.payload.clone())
            }
            _ => {
                return Err(CoreError::MalformedCredential(
                    "JWT carries no credential".into(),
                ))
            }
        };

        Ok(Self {
            format: CredentialFormat::Jwt,
            document,
            proof: Some(jws.proof),
            encoded: Some(token.trim().to_string()),
        })
    }

    /// Decode an SD-JWT, keeping only disclosures whose digest the issuer signed.
    pub fn from_sd_jwt(token: &str) -> Result<Self> {
        let token = token.trim();
        if !token.contains(SD_JWT_SEPARATOR) {
            return Err(CoreError::InvalidDisclosure("missing '~' separator".into()));
        }

        let mut parts = token.split(SD_JWT_SEPARATOR);
        let issuer_jwt = parts.next().unwrap_or_default();
        let jws = CompactJws::parse(issuer_jwt)?;

        match jws.payload.get("_sd_alg").and_then(Value::as_str) {
            None | Some("sha-256") => {}
            Some(other) => {
                return Err(CoreError::InvalidDisclosure(format!(
                    "unsupported _sd_alg: {other}"
                )))
            }
        }

        let signed_digests: Vec<&str> = jws
            .payload
            .get("_sd")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut claims = jws.payload.clone();
        for disclosure in parts.filter(|p| !p.is_empty() && !p.contains('.')) {
            let digest = encode_base64url(&Sha256::digest(disclosure.as_bytes()));
            if !signed_digests.contains(&digest.as_str()) {
                tracing::debug!("ignoring disclosure not covered by issuer signature");
                continue;
            }
            let (name, value) = decode_disclosure(disclosure)?;
            claims.insert(name, value);
        }

        Ok(Self {
            format: CredentialFormat::SdJwt,
            document: normalize_flat_claims(claims),
            proof: Some(jws.proof),
            encoded: Some(token.to_string()),
        })
    }

    /// Accept a plain JSON credential object.
    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| CoreError::MalformedCredential("expected a JSON object".into()))?;

        if !(obj.contains_key("credentialSubject") || obj.contains_key("subject")) {
            return Err(CoreError::MalformedCredential(
                "JSON credential has no subject".into(),
            ));
        }

        Ok(Self {
            format: CredentialFormat::Json,
            document: value.clone(),
            proof: None,
            encoded: None,
        })
    }

    /// Issuer DID as declared by the document.
    pub fn issuer(&self) -> Option<Did> {
        match self.document.get("issuer")? {
            Value::String(s) => Some(Did::new(s.as_str())),
            Value::Object(o) => o.get("id").and_then(Value::as_str).map(Did::new),
            _ => None,
        }
    }

    /// Declared schema identifier.
    pub fn schema_id(&self) -> Option<String> {
        let from_schema = match self.document.get("credentialSchema") {
            Some(Value::Object(o)) => o.get("id").and_then(Value::as_str),
            Some(Value::Array(a)) => a
                .first()
                .and_then(|s| s.get("id"))
                .and_then(Value::as_str),
            _ => None,
        };
        from_schema
            .or_else(|| self.document.get("schemaId").and_then(Value::as_str))
            .map(str::to_string)
    }
}

/// A credential that passed validation.
///
/// Only [`crate::CredentialValidator::accept`] constructs these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub issuer: Did,
    pub subject_id: Option<Did>,
    pub clearance_level: ClearanceLevel,
    pub encryption_public_key: EncryptionPublicKey,
    pub encryption_key_fingerprint: KeyFingerprint,
    pub signing_public_key: Option<String>,
    pub schema_id: String,
    pub format: CredentialFormat,
}

/// Who a stored credential belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "did", rename_all = "snake_case")]
pub enum CredentialHolder {
    /// Issued to this party.
    Own,
    /// Presented by a peer at this connection DID.
    Peer(ConnectionDid),
}

/// A credential as kept by the credential store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub id: String,
    pub holder: CredentialHolder,
    pub raw: RawCredential,
    /// Local time the credential was received (Unix ms).
    pub received_at: i64,
}

impl StoredCredential {
    /// Wrap a freshly received credential with a generated id.
    pub fn new(holder: CredentialHolder, raw: RawCredential, received_at: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            holder,
            raw,
            received_at,
        }
    }
}

/// A parsed JWS compact serialization.
struct CompactJws {
    payload: Map<String, Value>,
    proof: JwsProof,
}

impl CompactJws {
    fn parse(token: &str) -> Result<Self> {
        let segments: Vec<&str> = token.split('.').collect();
        let [header_b64, payload_b64, signature_b64] = segments.as_slice() else {
            return Err(CoreError::MalformedJws(format!(
                "expected 3 segments, got {}",
                segments.len()
            )));
        };

        let header: Value = serde_json::from_slice(&decode_base64url(header_b64)?)?;
        let alg = header
            .get("alg")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::MalformedJws("header has no alg".into()))?
            .to_string();

        let payload = match serde_json::from_slice(&decode_base64url(payload_b64)?)? {
            Value::Object(map) => map,
            _ => return Err(CoreError::MalformedJws("payload is not an object".into())),
        };

        let signature = decode_base64url(signature_b64)?;

        Ok(Self {
            payload,
            proof: JwsProof {
                alg,
                signing_input: format!("{header_b64}.{payload_b64}"),
                signature,
            },
        })
    }
}

/// Decode a `[salt, name, value]` disclosure.
fn decode_disclosure(disclosure: &str) -> Result<(String, Value)> {
    let decoded: Value = serde_json::from_slice(&decode_base64url(disclosure)?)?;
    match decoded.as_array().map(Vec::as_slice) {
        Some([_salt, Value::String(name), value]) => Ok((name.clone(), value.clone())),
        _ => Err(CoreError::InvalidDisclosure(
            "expected [salt, name, value]".into(),
        )),
    }
}

/// Fold flat SD-JWT claims into the VC document model.
fn normalize_flat_claims(claims: Map<String, Value>) -> Value {
    let mut doc = Map::new();
    if let Some(iss) = claims.get("iss") {
        doc.insert("issuer".into(), iss.clone());
    }
    if let Some(vct) = claims.get("vct") {
        doc.insert("schemaId".into(), vct.clone());
    }

    let nested = ["credentialSubject", "subject"]
        .iter()
        .find(|key| claims.contains_key(**key));

    match nested {
        Some(key) => {
            doc.insert((*key).to_string(), claims[*key].clone());
        }
        None => {
            let mut subject: Map<String, Value> = claims
                .iter()
                .filter(|(k, _)| !REGISTERED_CLAIMS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if let Some(sub) = claims.get("sub") {
                subject.insert("id".into(), sub.clone());
            }
            doc.insert("credentialSubject".into(), Value::Object(subject));
        }
    }

    Value::Object(doc)
}
