//! Ceremony engine
//!
//! Drives the four protocol steps over injected stores and verifier:
//!
//! ```text
//! begin_registration ──token──▶ finish_registration
//! begin_login        ──token──▶ finish_login
//! ```
//!
//! Each begin step issues a challenge and parks it in a session. Each finish
//! step consumes that session first, so a token can be redeemed at most once
//! whatever the outcome of verification.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::error::{CeremonyError, Result, StoreError};
use crate::model::{CeremonyKind, CredentialId, Identity, NewSession, Session, SessionToken, User};
use crate::store::{CredentialStore, SessionStore};
use crate::validation::{validate_username, DEFAULT_MAX_USERNAME_LEN};
use crate::verifier::AuthenticatorVerifier;

/// tracing target for security-relevant events
pub const AUDIT_TARGET: &str = "passkey_audit";

/// Default lifetime of a pending ceremony
pub const DEFAULT_CEREMONY_TTL: Duration = Duration::from_secs(300);

/// Engine tunables
#[derive(Debug, Clone)]
pub struct CeremonyConfig {
    /// Lifetime of a registration session
    pub registration_ttl: Duration,
    /// Lifetime of a login session
    pub login_ttl: Duration,
    /// Maximum username length in characters
    pub max_username_len: usize,
}

impl Default for CeremonyConfig {
    fn default() -> Self {
        Self {
            registration_ttl: DEFAULT_CEREMONY_TTL,
            login_ttl: DEFAULT_CEREMONY_TTL,
            max_username_len: DEFAULT_MAX_USERNAME_LEN,
        }
    }
}

/// A credential's signature counter failed to advance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloneWarning {
    pub user_id: String,
    pub credential_id: CredentialId,
    /// Counter stored before this login
    pub stored_count: u32,
    /// Counter the authenticator reported
    pub reported_count: u32,
}

impl CloneWarning {
    /// Returns a warning when `reported` does not advance past `stored`.
    ///
    /// Authenticators without a counter report 0 forever, so 0 after 0 is
    /// not a regression.
    pub fn check(
        user_id: &str,
        credential_id: &CredentialId,
        stored: u32,
        reported: u32,
    ) -> Option<Self> {
        if (stored == 0 && reported == 0) || reported > stored {
            return None;
        }
        Some(Self {
            user_id: user_id.to_string(),
            credential_id: credential_id.clone(),
            stored_count: stored,
            reported_count: reported,
        })
    }
}

/// What to do with a login that raised a [`CloneWarning`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloneAction {
    /// Let the login succeed and surface the warning
    #[default]
    Accept,
    /// Fail the login as unverified
    Reject,
}

impl fmt::Display for CloneAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => f.write_str("accept"),
            Self::Reject => f.write_str("reject"),
        }
    }
}

impl FromStr for CloneAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accept" => Ok(Self::Accept),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown clone policy: {other}")),
        }
    }
}

/// Escalation hook for counter regressions
pub trait ClonePolicy: Send + Sync {
    fn on_clone_warning(&self, warning: &CloneWarning) -> CloneAction;
}

/// A fixed action is the simplest policy.
impl ClonePolicy for CloneAction {
    fn on_clone_warning(&self, _warning: &CloneWarning) -> CloneAction {
        *self
    }
}

/// Result of a begin step
#[derive(Debug, Clone)]
pub struct CeremonyStart {
    /// Bearer token the client must return with the finish step
    pub token: SessionToken,
    /// Options to hand to the client's authenticator API
    pub options: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationOutcome {
    pub user_id: String,
    pub credential_id: CredentialId,
    /// User's credential count including the new one
    pub credential_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginOutcome {
    pub user_id: String,
    pub credential_id: CredentialId,
    /// Stored signature counter after this login
    pub sign_count: u32,
    pub clone_warning: Option<CloneWarning>,
}

/// Passkey registration and login ceremonies
pub struct CeremonyEngine {
    credentials: Arc<dyn CredentialStore>,
    sessions: Arc<dyn SessionStore>,
    verifier: Arc<dyn AuthenticatorVerifier>,
    clone_policy: Arc<dyn ClonePolicy>,
    config: CeremonyConfig,
}

impl CeremonyEngine {
    /// Create an engine that accepts logins raising a clone warning.
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionStore>,
        verifier: Arc<dyn AuthenticatorVerifier>,
        config: CeremonyConfig,
    ) -> Self {
        Self {
            credentials,
            sessions,
            verifier,
            clone_policy: Arc::new(CloneAction::Accept),
            config,
        }
    }

    pub fn with_clone_policy(mut self, policy: Arc<dyn ClonePolicy>) -> Self {
        self.clone_policy = policy;
        self
    }

    pub fn config(&self) -> &CeremonyConfig {
        &self.config
    }

    /// Check both stores
    pub async fn check_health(&self) -> std::result::Result<(), StoreError> {
        self.credentials.check_health().await?;
        self.sessions.check_health().await
    }

    /// Start enrolling a passkey for `username`, creating the user on first use.
    ///
    /// Users that already hold credentials may enroll more.
    pub async fn begin_registration(&self, username: &str) -> Result<CeremonyStart> {
        let username = validate_username(username, self.config.max_username_len)?;
        let user = self.load_or_create_user(username).await?;

        let issued = self
            .verifier
            .registration_challenge(&user)
            .await
            .map_err(|e| {
                tracing::error!(username, error = %e, "Failed to issue registration challenge");
                CeremonyError::Internal("challenge generation failed".to_string())
            })?;

        let token = self
            .sessions
            .create_session(
                NewSession {
                    user_id: user.id().to_string(),
                    kind: CeremonyKind::Registration,
                    challenge: issued.challenge,
                },
                self.config.registration_ttl,
            )
            .await
            .map_err(|e| store_failure("create_session", e))?;

        tracing::info!(
            username,
            existing_credentials = user.credentials().len(),
            "Registration ceremony started"
        );

        Ok(CeremonyStart {
            token,
            options: issued.options,
        })
    }

    /// Complete a registration with the authenticator's attestation.
    pub async fn finish_registration(
        &self,
        token: &str,
        response: &Value,
    ) -> Result<RegistrationOutcome> {
        let session = self.take_session(token, CeremonyKind::Registration).await?;
        let user = self.session_user(&session).await?;

        let credential = self
            .verifier
            .verify_registration(&user, &session.challenge, response)
            .await
            .map_err(|e| {
                tracing::debug!(username = user.id(), error = %e, "Attestation rejected");
                CeremonyError::VerificationFailed
            })?;

        let credential_id = credential.credential_id.clone();
        let credential_count = match self.credentials.add_credential(user.id(), credential).await {
            Ok(count) => count,
            Err(StoreError::Conflict(_)) => {
                tracing::warn!(
                    target: AUDIT_TARGET,
                    username = user.id(),
                    credential_id = %credential_id,
                    "Credential id is already registered"
                );
                return Err(CeremonyError::Conflict(format!(
                    "credential {credential_id} is already registered"
                )));
            }
            Err(StoreError::NotFound) => {
                return Err(CeremonyError::NotFound(format!("user {}", user.id())));
            }
            Err(e) => return Err(store_failure("add_credential", e)),
        };

        tracing::info!(
            username = user.id(),
            credential_id = %credential_id,
            credential_count,
            "Passkey registered"
        );

        Ok(RegistrationOutcome {
            user_id: user.id().to_string(),
            credential_id,
            credential_count,
        })
    }

    /// Start a login for a user holding at least one credential.
    pub async fn begin_login(&self, username: &str) -> Result<CeremonyStart> {
        let username = validate_username(username, self.config.max_username_len)?;

        let user = match self.credentials.get_user(username).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => {
                return Err(CeremonyError::NotFound(format!("user {username}")));
            }
            Err(e) => return Err(store_failure("get_user", e)),
        };

        if user.credentials().is_empty() {
            return Err(CeremonyError::NotFound(format!(
                "no credentials registered for {username}"
            )));
        }

        let issued = self.verifier.login_challenge(&user).await.map_err(|e| {
            tracing::error!(username, error = %e, "Failed to issue login challenge");
            CeremonyError::Internal("challenge generation failed".to_string())
        })?;

        let token = self
            .sessions
            .create_session(
                NewSession {
                    user_id: user.id().to_string(),
                    kind: CeremonyKind::Login,
                    challenge: issued.challenge,
                },
                self.config.login_ttl,
            )
            .await
            .map_err(|e| store_failure("create_session", e))?;

        tracing::info!(
            username,
            credentials = user.credentials().len(),
            "Login ceremony started"
        );

        Ok(CeremonyStart {
            token,
            options: issued.options,
        })
    }

    /// Complete a login with the authenticator's assertion.
    pub async fn finish_login(&self, token: &str, response: &Value) -> Result<LoginOutcome> {
        let session = self.take_session(token, CeremonyKind::Login).await?;
        let user = self.session_user(&session).await?;

        let assertion = self
            .verifier
            .verify_login(&user, &session.challenge, response)
            .await
            .map_err(|e| {
                tracing::debug!(username = user.id(), error = %e, "Assertion rejected");
                CeremonyError::VerificationFailed
            })?;

        let Some(loaded) = user
            .credential(&assertion.credential_id)
            .map(|c| c.sign_count)
        else {
            tracing::warn!(
                target: AUDIT_TARGET,
                username = user.id(),
                credential_id = %assertion.credential_id,
                "Assertion names a credential the user does not own"
            );
            return Err(CeremonyError::VerificationFailed);
        };

        // The policy runs before anything is written, so a rejected login
        // leaves the credential untouched
        let mut judged = false;
        if let Some(warning) =
            CloneWarning::check(user.id(), &assertion.credential_id, loaded, assertion.sign_count)
        {
            self.judge_clone_warning(&warning)?;
            judged = true;
        }

        let stored = match self
            .credentials
            .record_sign_count(
                user.id(),
                &assertion.credential_id,
                assertion.sign_count,
                assertion.key_material,
            )
            .await
        {
            Ok(stored) => stored,
            Err(StoreError::NotFound) => return Err(CeremonyError::VerificationFailed),
            Err(e) => return Err(store_failure("record_sign_count", e)),
        };

        // A concurrent login may have advanced the counter since the user was read
        let clone_warning =
            CloneWarning::check(user.id(), &assertion.credential_id, stored, assertion.sign_count);
        if let (Some(warning), false) = (&clone_warning, judged) {
            self.judge_clone_warning(warning)?;
        }

        let sign_count = stored.max(assertion.sign_count);
        tracing::info!(
            username = user.id(),
            credential_id = %assertion.credential_id,
            sign_count,
            "Login succeeded"
        );

        Ok(LoginOutcome {
            user_id: user.id().to_string(),
            credential_id: assertion.credential_id,
            sign_count,
            clone_warning,
        })
    }

    fn judge_clone_warning(&self, warning: &CloneWarning) -> Result<()> {
        let action = self.clone_policy.on_clone_warning(warning);
        tracing::warn!(
            target: AUDIT_TARGET,
            username = %warning.user_id,
            credential_id = %warning.credential_id,
            stored_count = warning.stored_count,
            reported_count = warning.reported_count,
            action = %action,
            "Signature counter did not advance, authenticator may be cloned"
        );
        match action {
            CloneAction::Accept => Ok(()),
            CloneAction::Reject => Err(CeremonyError::VerificationFailed),
        }
    }

    async fn load_or_create_user(&self, username: &str) -> Result<User> {
        match self.credentials.get_user(username).await {
            Ok(user) => return Ok(user),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(store_failure("get_user", e)),
        }

        let user = User::new(username);
        match self.credentials.create_user(&user).await {
            Ok(()) => {
                tracing::info!(username, "Created user");
                Ok(user)
            }
            // Lost a creation race
            Err(StoreError::Conflict(_)) => self
                .credentials
                .get_user(username)
                .await
                .map_err(|e| store_failure("get_user", e)),
            Err(e) => Err(store_failure("create_user", e)),
        }
    }

    /// Consume the session behind `token`, requiring it to be of `kind`.
    async fn take_session(&self, token: &str, kind: CeremonyKind) -> Result<Session> {
        let session = match self.sessions.consume_session(token).await {
            Ok(session) => session,
            Err(StoreError::NotFound) => {
                tracing::debug!(ceremony = %kind, "Unknown session token");
                return Err(CeremonyError::InvalidSession);
            }
            Err(StoreError::Expired) => {
                tracing::debug!(ceremony = %kind, "Session expired");
                return Err(CeremonyError::InvalidSession);
            }
            Err(e) => return Err(store_failure("consume_session", e)),
        };

        if session.kind != kind {
            tracing::warn!(
                target: AUDIT_TARGET,
                username = %session.user_id,
                expected = %kind,
                actual = %session.kind,
                "Session token presented to the wrong ceremony"
            );
            return Err(CeremonyError::InvalidSession);
        }

        Ok(session)
    }

    async fn session_user(&self, session: &Session) -> Result<User> {
        match self.credentials.get_user(&session.user_id).await {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound) => Err(CeremonyError::NotFound(format!(
                "user {}",
                session.user_id
            ))),
            Err(e) => Err(store_failure("get_user", e)),
        }
    }
}

impl fmt::Debug for CeremonyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CeremonyEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn store_failure(operation: &'static str, err: StoreError) -> CeremonyError {
    tracing::error!(operation, error = %err, "Store operation failed");
    CeremonyError::Internal(format!("{operation} failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockAuthenticator, MockVerifier};
    use crate::store::{MemoryCredentialStore, MemorySessionStore};
    use serde_json::json;

    struct Harness {
        engine: CeremonyEngine,
        credentials: Arc<MemoryCredentialStore>,
        sessions: Arc<MemorySessionStore>,
    }

    fn harness_with(config: CeremonyConfig) -> Harness {
        let credentials = Arc::new(MemoryCredentialStore::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let engine = CeremonyEngine::new(
            credentials.clone(),
            sessions.clone(),
            Arc::new(MockVerifier::default()),
            config,
        );
        Harness {
            engine,
            credentials,
            sessions,
        }
    }

    fn harness() -> Harness {
        harness_with(CeremonyConfig::default())
    }

    async fn register(
        engine: &CeremonyEngine,
        username: &str,
        authenticator: &MockAuthenticator,
    ) -> RegistrationOutcome {
        let start = engine.begin_registration(username).await.unwrap();
        engine
            .finish_registration(start.token.as_str(), &authenticator.attest(&start.options))
            .await
            .unwrap()
    }

    fn allowed_ids(options: &Value) -> Vec<String> {
        options["publicKey"]["allowCredentials"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_clone_warning_rule() {
        let id = CredentialId::new(vec![1]);
        assert!(CloneWarning::check("u", &id, 0, 0).is_none());
        assert!(CloneWarning::check("u", &id, 0, 1).is_none());
        assert!(CloneWarning::check("u", &id, 5, 6).is_none());
        assert!(CloneWarning::check("u", &id, 5, 5).is_some());
        assert!(CloneWarning::check("u", &id, 5, 0).is_some());
    }

    #[test]
    fn test_clone_action_parse() {
        assert_eq!("accept".parse::<CloneAction>(), Ok(CloneAction::Accept));
        assert_eq!("REJECT".parse::<CloneAction>(), Ok(CloneAction::Reject));
        assert!("maybe".parse::<CloneAction>().is_err());
        assert_eq!(CloneAction::default(), CloneAction::Accept);
    }

    #[tokio::test]
    async fn test_registration_adds_one_credential_and_consumes_token() {
        let h = harness();
        let authenticator = MockAuthenticator::new(1);

        let start = h.engine.begin_registration("alice").await.unwrap();
        assert_eq!(h.sessions.pending_count(), 1);

        let response = authenticator.attest(&start.options);
        let outcome = h
            .engine
            .finish_registration(start.token.as_str(), &response)
            .await
            .unwrap();

        assert_eq!(outcome.user_id, "alice");
        assert_eq!(&outcome.credential_id, authenticator.credential_id());
        assert_eq!(outcome.credential_count, 1);
        assert_eq!(h.sessions.pending_count(), 0);

        let user = h.credentials.get_user("alice").await.unwrap();
        assert_eq!(user.credentials().len(), 1);
        assert_eq!(user.credentials()[0].sign_count, 0);

        // Replay
        let err = h
            .engine
            .finish_registration(start.token.as_str(), &response)
            .await
            .unwrap_err();
        assert_eq!(err, CeremonyError::InvalidSession);
        assert_eq!(h.credentials.credential_count(), 1);
    }

    #[tokio::test]
    async fn test_begin_registration_creates_user_once() {
        let h = harness();
        h.engine.begin_registration("alice").await.unwrap();
        h.engine.begin_registration("alice").await.unwrap();
        assert_eq!(h.credentials.user_count(), 1);
        assert_eq!(h.sessions.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let h = harness_with(CeremonyConfig {
            registration_ttl: Duration::from_millis(10),
            login_ttl: Duration::from_millis(10),
            ..CeremonyConfig::default()
        });
        let authenticator = MockAuthenticator::new(1);

        let start = h.engine.begin_registration("alice").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Still present, just past its expiry
        assert_eq!(h.sessions.pending_count(), 1);
        let err = h
            .engine
            .finish_registration(start.token.as_str(), &authenticator.attest(&start.options))
            .await
            .unwrap_err();
        assert_eq!(err, CeremonyError::InvalidSession);
        assert_eq!(h.credentials.credential_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_token_is_invalid_session() {
        let h = harness();
        let err = h
            .engine
            .finish_login("not-a-token", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, CeremonyError::InvalidSession);
    }

    #[tokio::test]
    async fn test_login_replay_is_rejected() {
        let h = harness();
        let mut authenticator = MockAuthenticator::new(1);
        register(&h.engine, "alice", &authenticator).await;

        let start = h.engine.begin_login("alice").await.unwrap();
        let response = authenticator.assert(&start.options);
        let outcome = h
            .engine
            .finish_login(start.token.as_str(), &response)
            .await
            .unwrap();
        assert_eq!(outcome.sign_count, 1);
        assert!(outcome.clone_warning.is_none());

        let err = h
            .engine
            .finish_login(start.token.as_str(), &response)
            .await
            .unwrap_err();
        assert_eq!(err, CeremonyError::InvalidSession);
    }

    #[tokio::test]
    async fn test_counter_regression_warns_then_advance_is_clean() {
        let h = harness();
        let authenticator = MockAuthenticator::new(1);
        register(&h.engine, "alice", &authenticator).await;
        h.credentials
            .record_sign_count("alice", authenticator.credential_id(), 5, None)
            .await
            .unwrap();

        // Reported == stored
        let start = h.engine.begin_login("alice").await.unwrap();
        let outcome = h
            .engine
            .finish_login(
                start.token.as_str(),
                &authenticator.assert_with_count(&start.options, 5),
            )
            .await
            .unwrap();
        let warning = outcome.clone_warning.unwrap();
        assert_eq!(warning.stored_count, 5);
        assert_eq!(warning.reported_count, 5);
        assert_eq!(outcome.sign_count, 5);

        // Reported < stored
        let start = h.engine.begin_login("alice").await.unwrap();
        let outcome = h
            .engine
            .finish_login(
                start.token.as_str(),
                &authenticator.assert_with_count(&start.options, 2),
            )
            .await
            .unwrap();
        assert!(outcome.clone_warning.is_some());
        assert_eq!(outcome.sign_count, 5);

        // Reported N+k
        let start = h.engine.begin_login("alice").await.unwrap();
        let outcome = h
            .engine
            .finish_login(
                start.token.as_str(),
                &authenticator.assert_with_count(&start.options, 8),
            )
            .await
            .unwrap();
        assert!(outcome.clone_warning.is_none());
        assert_eq!(outcome.sign_count, 8);

        let user = h.credentials.get_user("alice").await.unwrap();
        assert_eq!(user.credentials()[0].sign_count, 8);
        assert!(user.credentials()[0].last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_counterless_authenticator_never_warns() {
        let h = harness();
        let authenticator = MockAuthenticator::new(1);
        register(&h.engine, "alice", &authenticator).await;

        for _ in 0..2 {
            let start = h.engine.begin_login("alice").await.unwrap();
            let outcome = h
                .engine
                .finish_login(
                    start.token.as_str(),
                    &authenticator.assert_with_count(&start.options, 0),
                )
                .await
                .unwrap();
            assert!(outcome.clone_warning.is_none());
            assert_eq!(outcome.sign_count, 0);
        }
    }

    #[tokio::test]
    async fn test_reject_policy_fails_login() {
        let h = harness();
        let engine = h.engine.with_clone_policy(Arc::new(CloneAction::Reject));
        let authenticator = MockAuthenticator::new(1);
        register(&engine, "alice", &authenticator).await;
        h.credentials
            .record_sign_count("alice", authenticator.credential_id(), 5, None)
            .await
            .unwrap();
        let used_at = h.credentials.get_user("alice").await.unwrap().credentials()[0].last_used_at;

        let start = engine.begin_login("alice").await.unwrap();
        let err = engine
            .finish_login(
                start.token.as_str(),
                &authenticator.assert_with_count(&start.options, 3),
            )
            .await
            .unwrap_err();
        assert_eq!(err, CeremonyError::VerificationFailed);

        // A rejected login is not a use of the credential
        let user = h.credentials.get_user("alice").await.unwrap();
        assert_eq!(user.credentials()[0].sign_count, 5);
        assert_eq!(user.credentials()[0].last_used_at, used_at);

        // An advancing counter still logs in
        let start = engine.begin_login("alice").await.unwrap();
        let outcome = engine
            .finish_login(
                start.token.as_str(),
                &authenticator.assert_with_count(&start.options, 6),
            )
            .await
            .unwrap();
        assert_eq!(outcome.sign_count, 6);
    }

    #[tokio::test]
    async fn test_two_registrations_keep_order_and_both_are_offered() {
        let h = harness();
        let first = MockAuthenticator::new(1);
        let second = MockAuthenticator::new(2);

        assert_eq!(register(&h.engine, "alice", &first).await.credential_count, 1);
        assert_eq!(register(&h.engine, "alice", &second).await.credential_count, 2);

        let user = h.credentials.get_user("alice").await.unwrap();
        assert_eq!(
            user.credential_ids(),
            vec![first.credential_id().clone(), second.credential_id().clone()]
        );

        let start = h.engine.begin_login("alice").await.unwrap();
        assert_eq!(
            allowed_ids(&start.options),
            vec![
                first.credential_id().to_base64url(),
                second.credential_id().to_base64url()
            ]
        );

        // Either credential can log in
        let start = h.engine.begin_login("alice").await.unwrap();
        let outcome = h
            .engine
            .finish_login(
                start.token.as_str(),
                &second.assert_with_count(&start.options, 1),
            )
            .await
            .unwrap();
        assert_eq!(&outcome.credential_id, second.credential_id());
    }

    #[tokio::test]
    async fn test_begin_login_requires_credentials() {
        let h = harness();
        assert!(matches!(
            h.engine.begin_login("nobody").await,
            Err(CeremonyError::NotFound(_))
        ));

        // User exists after an abandoned registration, but has no credentials
        h.engine.begin_registration("alice").await.unwrap();
        assert!(matches!(
            h.engine.begin_login("alice").await,
            Err(CeremonyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_begin_login_single_credential() {
        let h = harness();
        let authenticator = MockAuthenticator::new(1);
        register(&h.engine, "alice", &authenticator).await;

        let first = h.engine.begin_login("alice").await.unwrap();
        let second = h.engine.begin_login("alice").await.unwrap();
        assert_eq!(
            allowed_ids(&first.options),
            vec![authenticator.credential_id().to_base64url()]
        );
        assert_ne!(first.token, second.token);
    }

    #[tokio::test]
    async fn test_registration_token_cannot_finish_login() {
        let h = harness();
        let mut authenticator = MockAuthenticator::new(1);
        register(&h.engine, "alice", &authenticator).await;

        let start = h.engine.begin_registration("alice").await.unwrap();
        let err = h
            .engine
            .finish_login(start.token.as_str(), &authenticator.assert(&start.options))
            .await
            .unwrap_err();
        assert_eq!(err, CeremonyError::InvalidSession);

        // Consumed by the failed attempt
        let err = h
            .engine
            .finish_registration(start.token.as_str(), &authenticator.attest(&start.options))
            .await
            .unwrap_err();
        assert_eq!(err, CeremonyError::InvalidSession);
    }

    #[tokio::test]
    async fn test_failed_verification_consumes_token() {
        let h = harness();
        let authenticator = MockAuthenticator::new(1);

        let start = h.engine.begin_registration("alice").await.unwrap();
        let mut forged = authenticator.attest(&start.options);
        forged["response"]["signature"] = json!("AAAA");
        let err = h
            .engine
            .finish_registration(start.token.as_str(), &forged)
            .await
            .unwrap_err();
        assert_eq!(err, CeremonyError::VerificationFailed);

        let err = h
            .engine
            .finish_registration(start.token.as_str(), &authenticator.attest(&start.options))
            .await
            .unwrap_err();
        assert_eq!(err, CeremonyError::InvalidSession);
        assert_eq!(h.credentials.credential_count(), 0);
    }

    #[tokio::test]
    async fn test_login_with_foreign_credential_fails() {
        let h = harness();
        let alice_key = MockAuthenticator::new(1);
        let bob_key = MockAuthenticator::new(2);
        register(&h.engine, "alice", &alice_key).await;
        register(&h.engine, "bob", &bob_key).await;

        let start = h.engine.begin_login("alice").await.unwrap();
        let err = h
            .engine
            .finish_login(
                start.token.as_str(),
                &bob_key.assert_with_count(&start.options, 1),
            )
            .await
            .unwrap_err();
        assert_eq!(err, CeremonyError::VerificationFailed);
    }

    #[tokio::test]
    async fn test_duplicate_credential_is_conflict() {
        let h = harness();
        let shared = MockAuthenticator::new(1);
        register(&h.engine, "alice", &shared).await;

        let start = h.engine.begin_registration("bob").await.unwrap();
        let err = h
            .engine
            .finish_registration(start.token.as_str(), &shared.attest(&start.options))
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::Conflict(_)));
        assert!(h
            .credentials
            .get_user("bob")
            .await
            .unwrap()
            .credentials()
            .is_empty());
    }

    #[tokio::test]
    async fn test_invalid_username_touches_no_store() {
        let h = harness();
        let too_long = "x".repeat(65);
        for username in ["", "has space", "tab\there", too_long.as_str()] {
            assert!(matches!(
                h.engine.begin_registration(username).await,
                Err(CeremonyError::InvalidArgument(_))
            ));
            assert!(matches!(
                h.engine.begin_login(username).await,
                Err(CeremonyError::InvalidArgument(_))
            ));
        }
        assert_eq!(h.credentials.user_count(), 0);
        assert_eq!(h.sessions.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_finish_lets_one_through() {
        let h = harness();
        let authenticator = MockAuthenticator::new(1);
        let start = h.engine.begin_registration("alice").await.unwrap();
        let response = authenticator.attest(&start.options);

        let (a, b) = tokio::join!(
            h.engine.finish_registration(start.token.as_str(), &response),
            h.engine.finish_registration(start.token.as_str(), &response),
        );

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let failure = if a.is_ok() { b } else { a };
        assert_eq!(failure.unwrap_err(), CeremonyError::InvalidSession);
        assert_eq!(h.credentials.credential_count(), 1);
    }
}
