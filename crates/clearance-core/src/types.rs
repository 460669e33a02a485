//! Identifier types.
//!
//! Two DID flavors matter to the messaging layer and they are kept as
//! distinct types so one can never be passed where the other is expected:
//!
//! - [`Did`] names an identity inside a credential (issuer, subject).
//! - [`ConnectionDid`] is the live, transport-addressable identifier of a peer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque decentralized identifier embedded in credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    /// Wrap a DID string.
    pub fn new(did: impl Into<String>) -> Self {
        Self(did.into())
    }

    /// Get the DID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Did {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The DID a peer is reachable at on the transport.
///
/// This is what appears in a message's `from`/`to` fields. It is related to,
/// but not the same as, the subject DID inside that peer's credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionDid(String);

impl ConnectionDid {
    /// Wrap a connection DID string.
    pub fn new(did: impl Into<String>) -> Self {
        Self(did.into())
    }

    /// Get the DID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionDid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionDid {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Transport-assigned message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Get current time in milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
