//! Credential and session data model
//!
//! - [`User`]: identity aggregate owning an ordered list of [`Credential`]s
//! - [`Session`]: short-lived ceremony state addressed by a [`SessionToken`]

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IdentityError, StoreError};

/// Number of random bytes in a session token (256 bits)
pub const SESSION_TOKEN_BYTES: usize = 32;

/// Opaque credential identifier assigned by the authenticator.
///
/// Rendered as unpadded base64url wherever it crosses a text boundary.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CredentialId(Vec<u8>);

impl CredentialId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64url(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }

    pub fn from_base64url(encoded: &str) -> Option<Self> {
        URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .ok()
            .filter(|bytes| !bytes.is_empty())
            .map(Self)
    }
}

impl From<Vec<u8>> for CredentialId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<CredentialId> for String {
    fn from(id: CredentialId) -> Self {
        id.to_base64url()
    }
}

impl TryFrom<String> for CredentialId {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::from_base64url(&value).ok_or_else(|| format!("invalid credential id: {value}"))
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64url())
    }
}

impl fmt::Debug for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialId({})", self.to_base64url())
    }
}

/// One registered authenticator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub credential_id: CredentialId,
    /// Verification key material, opaque to everything but the verifier
    pub public_key: Vec<u8>,
    /// Authenticator signature counter, used for clone detection
    pub sign_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(credential_id: CredentialId, public_key: Vec<u8>, sign_count: u32) -> Self {
        Self {
            credential_id,
            public_key,
            sign_count,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }
}

/// Capability set the ceremony engine and verifiers need from an identity.
pub trait Identity: Send + Sync {
    /// Stable unique identifier (the username)
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Registered credentials in registration order
    fn credentials(&self) -> &[Credential];

    /// Append a credential, rejecting a duplicate credential id.
    fn add_credential(&mut self, credential: Credential) -> Result<(), IdentityError>;

    /// Replace the credential with the same id, returning the previous version.
    fn update_credential(&mut self, credential: Credential) -> Result<Credential, IdentityError>;

    fn credential(&self, credential_id: &CredentialId) -> Option<&Credential> {
        self.credentials()
            .iter()
            .find(|c| &c.credential_id == credential_id)
    }

    fn credential_ids(&self) -> Vec<CredentialId> {
        self.credentials()
            .iter()
            .map(|c| c.credential_id.clone())
            .collect()
    }
}

/// Identity aggregate. The id equals the username and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    id: String,
    name: String,
    display_name: String,
    credentials: Vec<Credential>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// New user with no credentials; name and display name default to the username.
    pub fn new(username: impl Into<String>) -> Self {
        let username = username.into();
        let now = Utc::now();
        Self {
            id: username.clone(),
            name: username.clone(),
            display_name: username,
            credentials: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a user from persisted parts, rejecting duplicate credential ids.
    pub fn from_parts(
        id: String,
        name: String,
        display_name: String,
        credentials: Vec<Credential>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, IdentityError> {
        let mut user = Self {
            id,
            name,
            display_name,
            credentials: Vec::with_capacity(credentials.len()),
            created_at,
            updated_at,
        };
        for credential in credentials {
            user.push_unique(credential)?;
        }
        Ok(user)
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    fn push_unique(&mut self, credential: Credential) -> Result<(), IdentityError> {
        if self.credential(&credential.credential_id).is_some() {
            return Err(IdentityError::DuplicateCredential(
                credential.credential_id.to_base64url(),
            ));
        }
        self.credentials.push(credential);
        Ok(())
    }
}

impl Identity for User {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    fn add_credential(&mut self, credential: Credential) -> Result<(), IdentityError> {
        self.push_unique(credential)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn update_credential(&mut self, credential: Credential) -> Result<Credential, IdentityError> {
        let slot = self
            .credentials
            .iter_mut()
            .find(|c| c.credential_id == credential.credential_id)
            .ok_or_else(|| {
                IdentityError::UnknownCredential(credential.credential_id.to_base64url())
            })?;
        let previous = std::mem::replace(slot, credential);
        self.updated_at = Utc::now();
        Ok(previous)
    }
}

/// Which ceremony a session belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CeremonyKind {
    Registration,
    Login,
}

impl CeremonyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Login => "login",
        }
    }
}

impl fmt::Display for CeremonyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CeremonyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "registration" => Ok(Self::Registration),
            "login" => Ok(Self::Login),
            other => Err(format!("unknown ceremony kind: {other}")),
        }
    }
}

/// Challenge bound to one ceremony instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    /// Random nonce the authenticator must sign over
    pub nonce: Vec<u8>,
    /// Verifier-private state needed to check the response
    pub state: serde_json::Value,
}

/// Bearer token naming a pending ceremony.
///
/// Whoever presents it can complete the ceremony, so it is never logged.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// Draw a fresh token from the OS random source.
    ///
    /// A random source failure is returned, never papered over.
    pub fn generate() -> Result<Self, StoreError> {
        let mut bytes = [0u8; SESSION_TOKEN_BYTES];
        getrandom::fill(&mut bytes).map_err(|e| StoreError::Entropy(e.to_string()))?;
        Ok(Self(URL_SAFE_NO_PAD.encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for SessionToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for SessionToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

/// Input for [`SessionStore::create_session`](crate::store::SessionStore::create_session)
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: String,
    pub kind: CeremonyKind,
    pub challenge: Challenge,
}

/// Pending ceremony state
#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    pub user_id: String,
    pub kind: CeremonyKind,
    pub challenge: Challenge,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// A session is expired strictly after `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
