//! Credential and session store contracts
//!
//! - **Credentials**: durable `User` aggregates keyed by username
//! - **Sessions**: expiring ceremony state keyed by an opaque token
//!
//! Every read-then-write on a single key is atomic with respect to other
//! operations on that key. Implementations never cache across calls.

mod memory;

pub use memory::{MemoryCredentialStore, MemorySessionStore};

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{Credential, CredentialId, NewSession, Session, SessionToken, User};

/// Durable mapping from username to [`User`]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load a user and all of their credentials.
    async fn get_user(&self, username: &str) -> Result<User, StoreError>;

    /// Insert a new user. Fails with `Conflict` if the id already exists.
    async fn create_user(&self, user: &User) -> Result<(), StoreError>;

    /// Replace an existing user's fields and credential list.
    ///
    /// Fails with `NotFound` if the user was never created.
    async fn save_user(&self, user: &User) -> Result<(), StoreError>;

    /// Atomically append a credential to a user.
    ///
    /// Returns the user's credential count afterwards. Fails with `Conflict`
    /// if the credential id is already registered to anyone.
    async fn add_credential(&self, user_id: &str, credential: Credential)
        -> Result<usize, StoreError>;

    /// Atomically record a signature counter reported by a login.
    ///
    /// The stored count and key material only move forward: they are
    /// replaced when `reported` exceeds the stored count. `last_used_at` is
    /// always stamped. Returns the count stored before this call.
    async fn record_sign_count(
        &self,
        user_id: &str,
        credential_id: &CredentialId,
        reported: u32,
        key_material: Option<Vec<u8>>,
    ) -> Result<u32, StoreError>;

    /// Check backing store connectivity
    async fn check_health(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Expiring mapping from session token to pending ceremony state
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a new session under a freshly generated token.
    async fn create_session(
        &self,
        session: NewSession,
        ttl: Duration,
    ) -> Result<SessionToken, StoreError>;

    /// Look up a session without consuming it.
    ///
    /// Returns `Expired` (and deletes the record) once `now > expires_at`.
    async fn get_session(&self, token: &str) -> Result<Session, StoreError>;

    /// Remove and return a session in one step.
    ///
    /// At most one caller can consume a given token. An expired record is
    /// still removed but reported as `Expired`.
    async fn consume_session(&self, token: &str) -> Result<Session, StoreError>;

    /// Delete a session. Deleting an unknown token is not an error.
    async fn delete_session(&self, token: &str) -> Result<(), StoreError>;

    /// Remove every expired session, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, StoreError>;

    /// Check backing store connectivity
    async fn check_health(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Convert a TTL into a chrono duration, rejecting values chrono cannot hold.
pub fn ttl_to_chrono(ttl: Duration) -> Result<chrono::Duration, StoreError> {
    chrono::Duration::from_std(ttl)
        .map_err(|e| StoreError::Serialization(format!("invalid session ttl: {e}")))
}
