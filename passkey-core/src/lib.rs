//! Passkey Core - passkey registration and login ceremonies
//!
//! This crate implements the protocol engine behind passkey authentication:
//! the user/credential/session data model, the store contracts, and the
//! two-step ceremonies that bind a challenge to a user and verify the signed
//! response.
//!
//! # Features
//!
//! - Single-use, expiring ceremony sessions addressed by 256-bit tokens
//! - Signature counter tracking with a pluggable clone policy
//! - Store and verifier traits for dependency injection
//! - In-memory stores and a mock verifier for tests and development
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use passkey_core::{
//!     CeremonyConfig, CeremonyEngine, MemoryCredentialStore, MemorySessionStore,
//!     MockAuthenticator, MockVerifier,
//! };
//!
//! # async fn example() -> passkey_core::Result<()> {
//! // Use the mock verifier for testing (in production, use a WebAuthn verifier)
//! let engine = CeremonyEngine::new(
//!     Arc::new(MemoryCredentialStore::new()),
//!     Arc::new(MemorySessionStore::new()),
//!     Arc::new(MockVerifier::default()),
//!     CeremonyConfig::default(),
//! );
//! let mut authenticator = MockAuthenticator::new(42);
//!
//! let start = engine.begin_registration("alice").await?;
//! let attestation = authenticator.attest(&start.options);
//! engine.finish_registration(start.token.as_str(), &attestation).await?;
//!
//! let start = engine.begin_login("alice").await?;
//! let assertion = authenticator.assert(&start.options);
//! let outcome = engine.finish_login(start.token.as_str(), &assertion).await?;
//! assert!(outcome.clone_warning.is_none());
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod mock;
pub mod model;
pub mod store;
pub mod validation;
pub mod verifier;

// Re-export main types for convenience
pub use engine::{
    CeremonyConfig, CeremonyEngine, CeremonyStart, CloneAction, ClonePolicy, CloneWarning,
    LoginOutcome, RegistrationOutcome, AUDIT_TARGET, DEFAULT_CEREMONY_TTL,
};
pub use error::{CeremonyError, IdentityError, Result, StoreError, VerifierError};
pub use mock::{MockAuthenticator, MockVerifier};
pub use model::{
    CeremonyKind, Challenge, Credential, CredentialId, Identity, NewSession, Session,
    SessionToken, User, SESSION_TOKEN_BYTES,
};
pub use store::{CredentialStore, MemoryCredentialStore, MemorySessionStore, SessionStore};
pub use validation::{validate_username, DEFAULT_MAX_USERNAME_LEN};
pub use verifier::{challenge_from_options, Assertion, AuthenticatorVerifier, IssuedChallenge};
