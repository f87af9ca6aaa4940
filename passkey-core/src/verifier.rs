//! Authenticator verifier contract
//!
//! The verifier owns everything cryptographic: it issues the challenge and
//! client options for a ceremony, and later checks the authenticator's signed
//! response against the challenge it issued. The engine only moves the opaque
//! [`Challenge`] between the two calls.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::Value;

use crate::error::VerifierError;
use crate::model::{Challenge, Credential, CredentialId, Identity};

/// Client options plus the challenge they commit to
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    /// Options handed to the client (`{"publicKey": {...}}`)
    pub options: Value,
    /// Nonce and verifier-private state, kept server-side in the session
    pub challenge: Challenge,
}

/// A verified login assertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    pub credential_id: CredentialId,
    /// Signature counter reported by the authenticator
    pub sign_count: u32,
    /// Refreshed key material, when the verifier tracks more than the raw key
    pub key_material: Option<Vec<u8>>,
}

#[async_trait]
pub trait AuthenticatorVerifier: Send + Sync {
    /// Issue a registration challenge. Existing credentials are excluded.
    async fn registration_challenge(
        &self,
        identity: &dyn Identity,
    ) -> Result<IssuedChallenge, VerifierError>;

    /// Issue a login challenge restricted to the identity's credentials.
    async fn login_challenge(
        &self,
        identity: &dyn Identity,
    ) -> Result<IssuedChallenge, VerifierError>;

    /// Check an attestation response and return the new credential.
    async fn verify_registration(
        &self,
        identity: &dyn Identity,
        challenge: &Challenge,
        response: &Value,
    ) -> Result<Credential, VerifierError>;

    /// Check an assertion response against one of the identity's credentials.
    async fn verify_login(
        &self,
        identity: &dyn Identity,
        challenge: &Challenge,
        response: &Value,
    ) -> Result<Assertion, VerifierError>;
}

/// Extract the raw challenge bytes from `{"publicKey": {"challenge": "<b64url>"}}`.
pub fn challenge_from_options(options: &Value) -> Option<Vec<u8>> {
    let encoded = options.get("publicKey")?.get("challenge")?.as_str()?;
    URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_challenge_from_options() {
        let options = json!({ "publicKey": { "challenge": "AQID" } });
        assert_eq!(challenge_from_options(&options), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_challenge_from_options_missing_or_invalid() {
        assert!(challenge_from_options(&json!({})).is_none());
        assert!(challenge_from_options(&json!({ "publicKey": {} })).is_none());
        assert!(challenge_from_options(&json!({ "publicKey": { "challenge": 7 } })).is_none());
        assert!(challenge_from_options(&json!({ "publicKey": { "challenge": "!!" } })).is_none());
    }
}
