//! Proptest generators for property-based testing.

use proptest::prelude::*;

use clearance_cipher::X25519StaticSecret;
use clearance_core::{ClearanceLevel, ConnectionDid, Did};

use crate::fixtures::TestIssuer;

/// Generate a clearance level.
pub fn clearance_level() -> impl Strategy<Value = ClearanceLevel> {
    prop::sample::select(ClearanceLevel::ALL.to_vec())
}

/// Generate an X25519 secret.
pub fn secret() -> impl Strategy<Value = X25519StaticSecret> {
    any::<[u8; 32]>().prop_map(X25519StaticSecret::from_bytes)
}

/// Generate a `did:web` issuer DID.
pub fn issuer_did() -> impl Strategy<Value = Did> {
    "[a-z]{1,12}(\\.[a-z]{2,6}){1,2}".prop_map(|host| Did::new(format!("did:web:{host}")))
}

/// Generate a signing issuer with a deterministic key.
pub fn issuer() -> impl Strategy<Value = TestIssuer> {
    (issuer_did(), any::<[u8; 32]>())
        .prop_map(|(did, seed)| TestIssuer::with_seed(did.as_str(), seed))
}

/// Generate a pairwise `did:peer` connection DID.
pub fn connection_did() -> impl Strategy<Value = ConnectionDid> {
    "[A-Za-z0-9]{8,32}".prop_map(|id| ConnectionDid::new(format!("did:peer:2.{id}")))
}

/// Generate message bytes up to `max_len`.
pub fn plaintext(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}
