//! # Clearance Core
//!
//! Pure primitives for clearance-gated messaging: identifiers, clearance
//! levels, credential decoding, and the credential validator.
//!
//! This crate does no I/O. Everything here is a function of decoded data.
//!
//! ## Key Types
//!
//! - [`ClearanceLevel`] - Totally ordered classification tier
//! - [`RawCredential`] - A decoded, untrusted credential (JWT, SD-JWT or JSON)
//! - [`CredentialShape`] - Which subject layout a credential uses
//! - [`CredentialValidator`] - Turns a `RawCredential` into a trusted [`Credential`]
//! - [`Message`] - A transport message, classified by [`MessageKind`]
//!
//! ## Identifiers
//!
//! [`Did`] and [`ConnectionDid`] are distinct types. Key lookups and message
//! addressing use `ConnectionDid`; credentials only ever carry `Did`.

pub mod clearance;
pub mod credential;
pub mod crypto;
pub mod error;
pub mod message;
pub mod shape;
pub mod trust;
pub mod types;
pub mod validator;

pub use clearance::ClearanceLevel;
pub use credential::{
    Credential, CredentialFormat, CredentialHolder, JwsProof, RawCredential, StoredCredential,
};
pub use crypto::{
    decode_base64url, encode_base64url, EncryptionPublicKey, IssuerVerifyingKey, KeyFingerprint,
    KeyMaterial,
};
pub use error::{CoreError, Result};
pub use message::{
    Attachment, AttachmentData, Connection, Direction, Message, MessageKind,
    PresentationRequestRecord, PresentationStatus,
};
pub use shape::{ClearanceClaims, CredentialShape};
pub use trust::{TrustPolicy, TrustedIssuer};
pub use types::{now_millis, ConnectionDid, Did, MessageId};
pub use validator::{CredentialValidator, Rejection};
