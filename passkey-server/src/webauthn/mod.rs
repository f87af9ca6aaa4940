//! WebAuthn/FIDO2 passkey verification
//!
//! - `config`: WebAuthn Relying Party configuration
//! - `verifier`: `AuthenticatorVerifier` implementation over webauthn-rs

mod config;
mod verifier;

pub use config::{ConfigError, RelyingParty, WebAuthnConfig};
pub use verifier::WebauthnVerifier;
