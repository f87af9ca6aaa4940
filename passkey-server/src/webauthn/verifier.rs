//! webauthn-rs backed authenticator verifier
//!
//! Credentials store the serialized `Passkey` record as their key material, so
//! the webauthn-rs credential (algorithm, key, backup flags) survives a round
//! trip through any `CredentialStore`. Ceremony state (`PasskeyRegistration` /
//! `PasskeyAuthentication`) travels in the session challenge.
//!
//! The counter inside a stored passkey is always 0. The authoritative sign
//! count is the credential's `sign_count`, and clone detection happens in the
//! ceremony engine. webauthn-rs fails any assertion whose counter does not
//! exceed the one in the passkey.

use async_trait::async_trait;
use passkey_core::{
    challenge_from_options, Assertion, AuthenticatorVerifier, Challenge, Credential, CredentialId,
    Identity, IssuedChallenge, VerifierError,
};
use serde_json::Value;
use uuid::Uuid;
use webauthn_rs::prelude::*;

use super::WebAuthnConfig;

/// Verifies passkey ceremonies with webauthn-rs
#[derive(Debug)]
pub struct WebauthnVerifier {
    config: WebAuthnConfig,
}

impl WebauthnVerifier {
    pub fn new(config: WebAuthnConfig) -> Self {
        Self { config }
    }

    /// Stable WebAuthn user handle derived from the username
    pub fn user_handle(identity: &dyn Identity) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, identity.id().as_bytes())
    }

    fn passkeys(identity: &dyn Identity) -> Result<Vec<Passkey>, VerifierError> {
        identity
            .credentials()
            .iter()
            .map(|c| decode_passkey(&c.public_key))
            .collect()
    }

    fn issued(options: Value, state: Value) -> Result<IssuedChallenge, VerifierError> {
        let nonce = challenge_from_options(&options)
            .ok_or_else(|| VerifierError::Challenge("options carry no challenge".to_string()))?;
        Ok(IssuedChallenge {
            options,
            challenge: Challenge { nonce, state },
        })
    }
}

/// Pointer to the signature counter in a serialized `Passkey`
const PASSKEY_COUNTER: &str = "/cred/counter";

fn zero_counter(mut value: Value) -> Value {
    if let Some(counter) = value.pointer_mut(PASSKEY_COUNTER) {
        *counter = Value::from(0u32);
    }
    value
}

fn decode_passkey(bytes: &[u8]) -> Result<Passkey, VerifierError> {
    serde_json::from_slice(bytes)
        .map(zero_counter)
        .and_then(serde_json::from_value)
        .map_err(|e| VerifierError::State(format!("stored passkey is unreadable: {}", e)))
}

fn encode_passkey(passkey: &Passkey) -> Result<Vec<u8>, VerifierError> {
    let value = encode(passkey).map(zero_counter)?;
    serde_json::to_vec(&value).map_err(|e| VerifierError::State(e.to_string()))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, VerifierError> {
    serde_json::to_value(value).map_err(|e| VerifierError::State(e.to_string()))
}

#[async_trait]
impl AuthenticatorVerifier for WebauthnVerifier {
    async fn registration_challenge(
        &self,
        identity: &dyn Identity,
    ) -> Result<IssuedChallenge, VerifierError> {
        let exclude: Vec<CredentialID> = identity
            .credentials()
            .iter()
            .map(|c| c.credential_id.as_bytes().to_vec().into())
            .collect();
        let exclude = (!exclude.is_empty()).then_some(exclude);

        let (ccr, reg_state) = self
            .config
            .webauthn()
            .start_passkey_registration(
                Self::user_handle(identity),
                identity.name(),
                identity.display_name(),
                exclude,
            )
            .map_err(|e| VerifierError::Challenge(format!("{:?}", e)))?;

        Self::issued(encode(&ccr)?, encode(&reg_state)?)
    }

    async fn login_challenge(
        &self,
        identity: &dyn Identity,
    ) -> Result<IssuedChallenge, VerifierError> {
        let passkeys = Self::passkeys(identity)?;

        let (rcr, auth_state) = self
            .config
            .webauthn()
            .start_passkey_authentication(&passkeys)
            .map_err(|e| VerifierError::Challenge(format!("{:?}", e)))?;

        Self::issued(encode(&rcr)?, encode(&auth_state)?)
    }

    async fn verify_registration(
        &self,
        _identity: &dyn Identity,
        challenge: &Challenge,
        response: &Value,
    ) -> Result<Credential, VerifierError> {
        let reg_state: PasskeyRegistration = serde_json::from_value(challenge.state.clone())
            .map_err(|e| VerifierError::State(e.to_string()))?;
        let credential: RegisterPublicKeyCredential = serde_json::from_value(response.clone())
            .map_err(|e| VerifierError::MalformedResponse(e.to_string()))?;

        let passkey = self
            .config
            .webauthn()
            .finish_passkey_registration(&credential, &reg_state)
            .map_err(|e| VerifierError::Rejected(format!("{:?}", e)))?;

        // Initial registration has counter 0
        Ok(Credential::new(
            CredentialId::new(passkey.cred_id().to_vec()),
            encode_passkey(&passkey)?,
            0,
        ))
    }

    async fn verify_login(
        &self,
        identity: &dyn Identity,
        challenge: &Challenge,
        response: &Value,
    ) -> Result<Assertion, VerifierError> {
        let auth_state: PasskeyAuthentication = serde_json::from_value(challenge.state.clone())
            .map_err(|e| VerifierError::State(e.to_string()))?;
        let credential: PublicKeyCredential = serde_json::from_value(response.clone())
            .map_err(|e| VerifierError::MalformedResponse(e.to_string()))?;

        let auth_result = self
            .config
            .webauthn()
            .finish_passkey_authentication(&credential, &auth_state)
            .map_err(|e| VerifierError::Rejected(format!("{:?}", e)))?;

        let credential_id = CredentialId::new(auth_result.cred_id().to_vec());
        let stored = identity
            .credential(&credential_id)
            .ok_or(VerifierError::UnknownCredential)?;

        // Only backup flag changes survive encoding, the counter is reset to 0
        let mut passkey = decode_passkey(&stored.public_key)?;
        let before = encode_passkey(&passkey)?;
        passkey.update_credential(&auth_result);
        let after = encode_passkey(&passkey)?;
        let key_material = (after != before).then_some(after);

        Ok(Assertion {
            credential_id,
            sign_count: auth_result.counter(),
            key_material,
        })
    }
}
