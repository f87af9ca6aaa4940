//! Mock authenticator verifier for testing.
//!
//! [`MockVerifier`] speaks the same option shape as a WebAuthn relying party
//! but replaces signatures with a SHA3 digest over public inputs, and
//! [`MockAuthenticator`] produces matching responses.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use serde_json::{json, Value};
use sha3::{Digest, Sha3_256};

use crate::error::VerifierError;
use crate::model::{Challenge, Credential, CredentialId, Identity};
use crate::verifier::{challenge_from_options, Assertion, AuthenticatorVerifier, IssuedChallenge};

/// Challenge nonce size in bytes
const NONCE_BYTES: usize = 32;

/// Client timeout advertised in options, in milliseconds
const TIMEOUT_MS: u64 = 30_000;

/// Mock verifier for testing.
/// WARNING: Do not use in production - anyone can forge its "signatures"!
#[derive(Debug, Clone)]
pub struct MockVerifier {
    rp_id: String,
    rp_name: String,
}

impl MockVerifier {
    pub fn new(rp_id: impl Into<String>, rp_name: impl Into<String>) -> Self {
        Self {
            rp_id: rp_id.into(),
            rp_name: rp_name.into(),
        }
    }

    fn nonce() -> Result<Vec<u8>, VerifierError> {
        let mut nonce = vec![0u8; NONCE_BYTES];
        getrandom::fill(&mut nonce).map_err(|e| VerifierError::Challenge(e.to_string()))?;
        Ok(nonce)
    }

    fn descriptors(identity: &dyn Identity) -> Vec<Value> {
        identity
            .credentials()
            .iter()
            .map(|c| json!({ "type": "public-key", "id": c.credential_id.to_base64url() }))
            .collect()
    }
}

impl Default for MockVerifier {
    fn default() -> Self {
        Self::new("localhost", "Passkey Mock")
    }
}

#[derive(Deserialize)]
struct AttestationBody {
    id: CredentialId,
    response: AttestationFields,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttestationFields {
    public_key: String,
    challenge: String,
    signature: String,
}

#[derive(Deserialize)]
struct AssertionBody {
    id: CredentialId,
    response: AssertionFields,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssertionFields {
    challenge: String,
    sign_count: u32,
    signature: String,
}

fn decode(field: &str, value: &str) -> Result<Vec<u8>, VerifierError> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| VerifierError::MalformedResponse(format!("{field}: {e}")))
}

fn registration_signature(public_key: &[u8], nonce: &[u8], credential_id: &CredentialId) -> Vec<u8> {
    let mut hasher = Sha3_256::new();
    hasher.update(b"passkey-mock-attestation");
    hasher.update(public_key);
    hasher.update(nonce);
    hasher.update(credential_id.as_bytes());
    hasher.finalize().to_vec()
}

fn login_signature(public_key: &[u8], nonce: &[u8], sign_count: u32) -> Vec<u8> {
    let mut hasher = Sha3_256::new();
    hasher.update(b"passkey-mock-assertion");
    hasher.update(public_key);
    hasher.update(nonce);
    hasher.update(sign_count.to_be_bytes());
    hasher.finalize().to_vec()
}

#[async_trait]
impl AuthenticatorVerifier for MockVerifier {
    async fn registration_challenge(
        &self,
        identity: &dyn Identity,
    ) -> Result<IssuedChallenge, VerifierError> {
        let nonce = Self::nonce()?;
        let options = json!({
            "publicKey": {
                "challenge": URL_SAFE_NO_PAD.encode(&nonce),
                "rp": { "id": self.rp_id, "name": self.rp_name },
                "user": {
                    "id": URL_SAFE_NO_PAD.encode(identity.id()),
                    "name": identity.name(),
                    "displayName": identity.display_name(),
                },
                "pubKeyCredParams": [{ "type": "public-key", "alg": -7 }],
                "timeout": TIMEOUT_MS,
                "excludeCredentials": Self::descriptors(identity),
            }
        });

        Ok(IssuedChallenge {
            options,
            challenge: Challenge {
                nonce,
                state: json!({ "rp_id": self.rp_id, "user_id": identity.id() }),
            },
        })
    }

    async fn login_challenge(
        &self,
        identity: &dyn Identity,
    ) -> Result<IssuedChallenge, VerifierError> {
        let nonce = Self::nonce()?;
        let options = json!({
            "publicKey": {
                "challenge": URL_SAFE_NO_PAD.encode(&nonce),
                "rpId": self.rp_id,
                "timeout": TIMEOUT_MS,
                "allowCredentials": Self::descriptors(identity),
                "userVerification": "preferred",
            }
        });

        Ok(IssuedChallenge {
            options,
            challenge: Challenge {
                nonce,
                state: json!({ "rp_id": self.rp_id, "user_id": identity.id() }),
            },
        })
    }

    async fn verify_registration(
        &self,
        _identity: &dyn Identity,
        challenge: &Challenge,
        response: &Value,
    ) -> Result<Credential, VerifierError> {
        let body: AttestationBody = serde_json::from_value(response.clone())
            .map_err(|e| VerifierError::MalformedResponse(e.to_string()))?;

        if decode("challenge", &body.response.challenge)? != challenge.nonce {
            return Err(VerifierError::ChallengeMismatch);
        }

        let public_key = decode("publicKey", &body.response.public_key)?;
        let signature = decode("signature", &body.response.signature)?;
        if signature != registration_signature(&public_key, &challenge.nonce, &body.id) {
            return Err(VerifierError::Rejected("bad attestation signature".into()));
        }

        Ok(Credential::new(body.id, public_key, 0))
    }

    async fn verify_login(
        &self,
        identity: &dyn Identity,
        challenge: &Challenge,
        response: &Value,
    ) -> Result<Assertion, VerifierError> {
        let body: AssertionBody = serde_json::from_value(response.clone())
            .map_err(|e| VerifierError::MalformedResponse(e.to_string()))?;

        let credential = identity
            .credential(&body.id)
            .ok_or(VerifierError::UnknownCredential)?;

        if decode("challenge", &body.response.challenge)? != challenge.nonce {
            return Err(VerifierError::ChallengeMismatch);
        }

        let signature = decode("signature", &body.response.signature)?;
        let expected = login_signature(
            &credential.public_key,
            &challenge.nonce,
            body.response.sign_count,
        );
        if signature != expected {
            return Err(VerifierError::Rejected("bad assertion signature".into()));
        }

        Ok(Assertion {
            credential_id: body.id,
            sign_count: body.response.sign_count,
            key_material: None,
        })
    }
}

/// Deterministic authenticator answering [`MockVerifier`] options.
/// WARNING: Do not use in production - key material is derived from a seed!
#[derive(Debug, Clone)]
pub struct MockAuthenticator {
    credential_id: CredentialId,
    public_key: Vec<u8>,
    counter: u32,
}

impl MockAuthenticator {
    pub fn new(seed: u64) -> Self {
        let derive = |label: &[u8]| {
            let mut hasher = Sha3_256::new();
            hasher.update(seed.to_le_bytes());
            hasher.update(label);
            hasher.finalize().to_vec()
        };

        Self {
            credential_id: CredentialId::new(derive(b"passkey-mock-credential")[..16].to_vec()),
            public_key: derive(b"passkey-mock-public-key"),
            counter: 0,
        }
    }

    pub fn credential_id(&self) -> &CredentialId {
        &self.credential_id
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Answer registration options with a correctly signed attestation.
    pub fn attest(&self, options: &Value) -> Value {
        let nonce = challenge_from_options(options).unwrap_or_default();
        let signature = registration_signature(&self.public_key, &nonce, &self.credential_id);
        json!({
            "id": self.credential_id.to_base64url(),
            "type": "public-key",
            "response": {
                "publicKey": URL_SAFE_NO_PAD.encode(&self.public_key),
                "challenge": URL_SAFE_NO_PAD.encode(&nonce),
                "signature": URL_SAFE_NO_PAD.encode(signature),
            }
        })
    }

    /// Answer login options, incrementing the signature counter first.
    pub fn assert(&mut self, options: &Value) -> Value {
        self.counter = self.counter.wrapping_add(1);
        self.assert_with_count(options, self.counter)
    }

    /// Answer login options reporting an arbitrary counter value.
    pub fn assert_with_count(&self, options: &Value, sign_count: u32) -> Value {
        let nonce = challenge_from_options(options).unwrap_or_default();
        let signature = login_signature(&self.public_key, &nonce, sign_count);
        json!({
            "id": self.credential_id.to_base64url(),
            "type": "public-key",
            "response": {
                "challenge": URL_SAFE_NO_PAD.encode(&nonce),
                "signCount": sign_count,
                "signature": URL_SAFE_NO_PAD.encode(signature),
            }
        })
    }
}
