//! # Clearance Testkit
//!
//! Testing utilities for clearance-gated messaging.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: [`TestIssuer`] mints signed clearance credentials as JWT,
//!   SD-JWT or JSON in any subject layout; [`TestParty`] holds a DID pair and
//!   an encryption secret
//! - **Generators**: Proptest strategies for levels, keys and DIDs
//!
//! ## Test Fixtures
//!
//! ```rust
//! use clearance_core::{ClearanceLevel, CredentialValidator};
//! use clearance_testkit::{TestIssuer, TestParty};
//!
//! let issuer = TestIssuer::new("did:web:issuer.test");
//! let alice = TestParty::new("alice");
//! let raw = issuer.issue(&alice.subject(ClearanceLevel::Secret));
//!
//! assert!(CredentialValidator::new(issuer.policy()).validate(&raw));
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    credential_attachment, presentation_request, presentation_response, received,
    ClearanceSubject, SubjectLayout, TestIssuer, TestParty, CLEARANCE_SCHEMA,
};
