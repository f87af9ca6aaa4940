use thiserror::Error;

/// Outcome kinds of a ceremony step, as surfaced to the caller.
///
/// `VerificationFailed` deliberately carries no detail: whatever sub-check
/// failed (unknown credential, bad signature, challenge mismatch) the caller
/// sees the same result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CeremonyError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid or expired session")]
    InvalidSession,

    #[error("Verification failed")]
    VerificationFailed,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CeremonyError {
    /// Stable, machine-readable name of the result kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::InvalidSession => "invalid_session",
            Self::VerificationFailed => "verification_failed",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal",
        }
    }
}

/// Errors raised by credential and session stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,

    #[error("Session expired")]
    Expired,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Random source failure: {0}")]
    Entropy(String),
}

/// Errors raised by an [`AuthenticatorVerifier`](crate::verifier::AuthenticatorVerifier).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifierError {
    #[error("Malformed authenticator response: {0}")]
    MalformedResponse(String),

    #[error("Challenge mismatch")]
    ChallengeMismatch,

    #[error("Unknown credential")]
    UnknownCredential,

    #[error("Authenticator response rejected: {0}")]
    Rejected(String),

    #[error("Ceremony state error: {0}")]
    State(String),

    #[error("Challenge generation failed: {0}")]
    Challenge(String),
}

/// Errors raised when mutating an identity's credential list.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Credential {0} is already registered")]
    DuplicateCredential(String),

    #[error("Credential {0} is not registered")]
    UnknownCredential(String),
}

impl From<IdentityError> for StoreError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::DuplicateCredential(id) => {
                Self::Conflict(format!("credential {id} already registered"))
            }
            IdentityError::UnknownCredential(_) => Self::NotFound,
        }
    }
}

pub type Result<T> = std::result::Result<T, CeremonyError>;
