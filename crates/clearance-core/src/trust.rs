//! Trust policy: the fixed allow-lists a deployment ships with.

use serde::{Deserialize, Serialize};

use crate::crypto::IssuerVerifyingKey;
use crate::error::Result;
use crate::types::Did;

/// An issuer whose clearance credentials are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedIssuer {
    pub did: Did,
    /// When set, JWS-encoded credentials from this issuer must verify against it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifying_key: Option<IssuerVerifyingKey>,
}

impl TrustedIssuer {
    /// Trust an issuer by DID only.
    pub fn new(did: impl Into<Did>) -> Self {
        Self {
            did: did.into(),
            verifying_key: None,
        }
    }

    /// Require signatures from this issuer to verify against `key`.
    pub fn with_verifying_key(mut self, key: IssuerVerifyingKey) -> Self {
        self.verifying_key = Some(key);
        self
    }
}

impl From<&str> for TrustedIssuer {
    fn from(did: &str) -> Self {
        Self::new(did)
    }
}

/// Issuers and schemas that make a credential usable as identity proof.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustPolicy {
    pub trusted_issuers: Vec<TrustedIssuer>,
    pub clearance_schemas: Vec<String>,
}

impl TrustPolicy {
    /// Build a policy from issuer and schema lists.
    pub fn new(
        issuers: impl IntoIterator<Item = TrustedIssuer>,
        schemas: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            trusted_issuers: issuers.into_iter().collect(),
            clearance_schemas: schemas.into_iter().map(Into::into).collect(),
        }
    }

    /// Load a policy from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Look up a trusted issuer.
    pub fn issuer(&self, did: &Did) -> Option<&TrustedIssuer> {
        self.trusted_issuers.iter().find(|i| &i.did == did)
    }

    /// Whether `schema_id` is one of the clearance schemas.
    pub fn is_clearance_schema(&self, schema_id: &str) -> bool {
        self.clearance_schemas.iter().any(|s| s == schema_id)
    }

    /// Whether both the issuer and schema are on the allow-lists.
    pub fn is_trusted(&self, issuer: &Did, schema_id: &str) -> bool {
        self.issuer(issuer).is_some() && self.is_clearance_schema(schema_id)
    }
}
