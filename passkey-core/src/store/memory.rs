//! In-memory credential and session stores
//!
//! Backed by `DashMap`: every single-key read-modify-write happens under the
//! key's shard lock, which gives the per-key atomicity the store contracts
//! require. Data is lost on restart, so these are meant for tests and
//! development.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{ttl_to_chrono, CredentialStore, SessionStore};
use crate::error::StoreError;
use crate::model::{Credential, CredentialId, Identity, NewSession, Session, SessionToken, User};

/// Thread-safe in-memory credential store
#[derive(Default)]
pub struct MemoryCredentialStore {
    /// Users keyed by username
    users: DashMap<String, User>,
    /// Global credential id ownership (credential_id -> username)
    owners: DashMap<CredentialId, String>,
}

impl MemoryCredentialStore {
    /// Create a new, empty credential store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Number of registered credentials across all users
    pub fn credential_count(&self) -> usize {
        self.owners.len()
    }

    /// Claim ownership of every credential in `credentials` for `user_id`.
    ///
    /// Either all claims succeed or none are kept.
    fn claim_all(&self, user_id: &str, credentials: &[Credential]) -> Result<(), StoreError> {
        let mut claimed = Vec::new();
        for credential in credentials {
            match self.owners.entry(credential.credential_id.clone()) {
                Entry::Occupied(entry) if entry.get() != user_id => {
                    for id in claimed {
                        self.owners.remove(&id);
                    }
                    return Err(StoreError::Conflict(format!(
                        "credential {} already registered",
                        credential.credential_id
                    )));
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(entry) => {
                    claimed.push(credential.credential_id.clone());
                    entry.insert(user_id.to_string());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_user(&self, username: &str) -> Result<User, StoreError> {
        self.users
            .get(username)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        match self.users.entry(user.id().to_string()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "user {} already exists",
                user.id()
            ))),
            Entry::Vacant(entry) => {
                self.claim_all(user.id(), user.credentials())?;
                entry.insert(user.clone());
                Ok(())
            }
        }
    }

    async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        let mut entry = self.users.get_mut(user.id()).ok_or(StoreError::NotFound)?;

        self.claim_all(user.id(), user.credentials())?;
        for dropped in entry.credentials() {
            if user.credential(&dropped.credential_id).is_none() {
                self.owners.remove(&dropped.credential_id);
            }
        }

        *entry = user.clone();
        Ok(())
    }

    async fn add_credential(
        &self,
        user_id: &str,
        credential: Credential,
    ) -> Result<usize, StoreError> {
        let mut entry = self.users.get_mut(user_id).ok_or(StoreError::NotFound)?;

        match self.owners.entry(credential.credential_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "credential {} already registered",
                credential.credential_id
            ))),
            Entry::Vacant(owner) => {
                entry.add_credential(credential)?;
                owner.insert(user_id.to_string());
                Ok(entry.credentials().len())
            }
        }
    }

    async fn record_sign_count(
        &self,
        user_id: &str,
        credential_id: &CredentialId,
        reported: u32,
        key_material: Option<Vec<u8>>,
    ) -> Result<u32, StoreError> {
        let mut entry = self.users.get_mut(user_id).ok_or(StoreError::NotFound)?;

        let mut credential = entry
            .credential(credential_id)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        let prior = credential.sign_count;

        if reported > prior {
            credential.sign_count = reported;
            if let Some(key) = key_material {
                credential.public_key = key;
            }
        }
        credential.last_used_at = Some(Utc::now());

        entry.update_credential(credential)?;
        Ok(prior)
    }
}

impl std::fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCredentialStore")
            .field("users", &self.users.len())
            .field("credentials", &self.owners.len())
            .finish()
    }
}

/// Thread-safe in-memory session store
#[derive(Default)]
pub struct MemorySessionStore {
    /// Pending ceremonies (token -> session)
    sessions: DashMap<String, Session>,
}

impl MemorySessionStore {
    /// Create a new, empty session store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, expired ones included until reaped
    pub fn pending_count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(
        &self,
        session: NewSession,
        ttl: Duration,
    ) -> Result<SessionToken, StoreError> {
        let ttl = ttl_to_chrono(ttl)?;
        let token = SessionToken::generate()?;
        let created_at = Utc::now();

        self.sessions.insert(
            token.as_str().to_string(),
            Session {
                token: token.clone(),
                user_id: session.user_id,
                kind: session.kind,
                challenge: session.challenge,
                created_at,
                expires_at: created_at + ttl,
            },
        );

        Ok(token)
    }

    async fn get_session(&self, token: &str) -> Result<Session, StoreError> {
        let now = Utc::now();
        if self
            .sessions
            .remove_if(token, |_, session| session.is_expired_at(now))
            .is_some()
        {
            return Err(StoreError::Expired);
        }

        self.sessions
            .get(token)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn consume_session(&self, token: &str) -> Result<Session, StoreError> {
        let (_, session) = self.sessions.remove(token).ok_or(StoreError::NotFound)?;
        if session.is_expired_at(Utc::now()) {
            Err(StoreError::Expired)
        } else {
            Ok(session)
        }
    }

    async fn delete_session(&self, token: &str) -> Result<(), StoreError> {
        self.sessions.remove(token);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut purged = 0;
        self.sessions.retain(|_, session| {
            let keep = !session.is_expired_at(now);
            if !keep {
                purged += 1;
            }
            keep
        });
        Ok(purged)
    }
}

impl std::fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySessionStore")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CeremonyKind, Challenge};

    fn credential(id: &[u8], count: u32) -> Credential {
        Credential::new(CredentialId::new(id.to_vec()), b"key".to_vec(), count)
    }

    fn new_session(user_id: &str, kind: CeremonyKind) -> NewSession {
        NewSession {
            user_id: user_id.to_string(),
            kind,
            challenge: Challenge {
                nonce: vec![42; 32],
                state: serde_json::json!({ "rp": "localhost" }),
            },
        }
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let store = MemoryCredentialStore::new();
        assert_eq!(
            store.get_user("alice").await.unwrap_err(),
            StoreError::NotFound
        );

        store.create_user(&User::new("alice")).await.unwrap();
        let user = store.get_user("alice").await.unwrap();
        assert_eq!(user.id(), "alice");
        assert!(user.credentials().is_empty());
    }

    #[tokio::test]
    async fn test_create_user_conflict() {
        let store = MemoryCredentialStore::new();
        store.create_user(&User::new("alice")).await.unwrap();
        let err = store.create_user(&User::new("alice")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_save_user_requires_existing_user() {
        let store = MemoryCredentialStore::new();
        let err = store.save_user(&User::new("ghost")).await.unwrap_err();
        assert_eq!(err, StoreError::NotFound);
    }

    #[tokio::test]
    async fn test_save_user_replaces_credentials() {
        let store = MemoryCredentialStore::new();
        let mut user = User::new("alice");
        user.add_credential(credential(b"one", 0)).unwrap();
        store.create_user(&user).await.unwrap();

        let mut replacement = User::new("alice").with_display_name("Alice");
        replacement.add_credential(credential(b"two", 0)).unwrap();
        store.save_user(&replacement).await.unwrap();
        // Idempotent
        store.save_user(&replacement).await.unwrap();

        let loaded = store.get_user("alice").await.unwrap();
        assert_eq!(loaded.display_name(), "Alice");
        assert_eq!(loaded.credential_ids(), vec![CredentialId::new(b"two".to_vec())]);
        assert_eq!(store.credential_count(), 1);

        // "one" was released and can be claimed by someone else
        store.create_user(&User::new("bob")).await.unwrap();
        store.add_credential("bob", credential(b"one", 0)).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_credential_is_globally_unique() {
        let store = MemoryCredentialStore::new();
        store.create_user(&User::new("alice")).await.unwrap();
        store.create_user(&User::new("bob")).await.unwrap();

        assert_eq!(
            store.add_credential("alice", credential(b"k1", 0)).await.unwrap(),
            1
        );
        assert_eq!(
            store.add_credential("alice", credential(b"k2", 0)).await.unwrap(),
            2
        );

        let err = store
            .add_credential("bob", credential(b"k1", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let err = store
            .add_credential("carol", credential(b"k3", 0))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound);
    }

    #[tokio::test]
    async fn test_record_sign_count_only_moves_forward() {
        let store = MemoryCredentialStore::new();
        store.create_user(&User::new("alice")).await.unwrap();
        store
            .add_credential("alice", credential(b"k1", 5))
            .await
            .unwrap();
        let id = CredentialId::new(b"k1".to_vec());

        let prior = store
            .record_sign_count("alice", &id, 8, Some(b"new-key".to_vec()))
            .await
            .unwrap();
        assert_eq!(prior, 5);

        let prior = store
            .record_sign_count("alice", &id, 3, Some(b"stale-key".to_vec()))
            .await
            .unwrap();
        assert_eq!(prior, 8);

        let user = store.get_user("alice").await.unwrap();
        let stored = user.credential(&id).unwrap();
        assert_eq!(stored.sign_count, 8);
        assert_eq!(stored.public_key, b"new-key".to_vec());
        assert!(stored.last_used_at.is_some());

        let err = store
            .record_sign_count("alice", &CredentialId::new(b"nope".to_vec()), 1, None)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound);
    }

    #[tokio::test]
    async fn test_session_create_get_delete() {
        let store = MemorySessionStore::new();
        let token = store
            .create_session(new_session("alice", CeremonyKind::Login), Duration::from_secs(60))
            .await
            .unwrap();

        let session = store.get_session(token.as_str()).await.unwrap();
        assert_eq!(session.user_id, "alice");
        assert_eq!(session.kind, CeremonyKind::Login);
        assert!(session.expires_at > session.created_at);

        store.delete_session(token.as_str()).await.unwrap();
        // Idempotent
        store.delete_session(token.as_str()).await.unwrap();
        assert_eq!(
            store.get_session(token.as_str()).await.unwrap_err(),
            StoreError::NotFound
        );
    }

    #[tokio::test]
    async fn test_consume_session_is_single_use() {
        let store = MemorySessionStore::new();
        let token = store
            .create_session(
                new_session("alice", CeremonyKind::Registration),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert!(store.consume_session(token.as_str()).await.is_ok());
        assert_eq!(
            store.consume_session(token.as_str()).await.unwrap_err(),
            StoreError::NotFound
        );
    }

    #[tokio::test]
    async fn test_expired_session_reported_and_reaped() {
        let store = MemorySessionStore::new();
        let token = store
            .create_session(new_session("alice", CeremonyKind::Login), Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.pending_count(), 1);
        assert_eq!(
            store.get_session(token.as_str()).await.unwrap_err(),
            StoreError::Expired
        );
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_consume_expired_session() {
        let store = MemorySessionStore::new();
        let token = store
            .create_session(new_session("alice", CeremonyKind::Login), Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(
            store.consume_session(token.as_str()).await.unwrap_err(),
            StoreError::Expired
        );
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemorySessionStore::new();
        store
            .create_session(new_session("a", CeremonyKind::Login), Duration::from_millis(5))
            .await
            .unwrap();
        store
            .create_session(new_session("b", CeremonyKind::Login), Duration::from_millis(5))
            .await
            .unwrap();
        let live = store
            .create_session(new_session("c", CeremonyKind::Login), Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.purge_expired().await.unwrap(), 2);
        assert_eq!(store.pending_count(), 1);
        assert!(store.get_session(live.as_str()).await.is_ok());
    }
}
