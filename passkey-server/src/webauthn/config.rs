//! Relying party identity for passkey ceremonies
//!
//! The relying party id scopes every credential the service issues: a passkey
//! registered under `example.com` is only offered back to origins on that
//! domain. Changing `WEBAUTHN_RP_ID` after users have enrolled orphans their
//! passkeys.

use url::Url;
use webauthn_rs::prelude::*;

const DEFAULT_RP_ID: &str = "localhost";
const DEFAULT_RP_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_RP_NAME: &str = "Passkey Service";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid origin URL: {0}")]
    InvalidOrigin(String),
    #[error("Relying party rejected by webauthn-rs: {0:?}")]
    Webauthn(WebauthnError),
}

/// Relying party settings as read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingParty {
    /// Domain credentials are bound to
    pub id: String,
    /// Origin browsers run the ceremony from
    pub origin: String,
    /// Name shown by the authenticator prompt
    pub name: String,
}

impl Default for RelyingParty {
    fn default() -> Self {
        Self {
            id: DEFAULT_RP_ID.to_string(),
            origin: DEFAULT_RP_ORIGIN.to_string(),
            name: DEFAULT_RP_NAME.to_string(),
        }
    }
}

impl RelyingParty {
    /// Reads `WEBAUTHN_RP_ID`, `WEBAUTHN_RP_ORIGIN` and `WEBAUTHN_RP_NAME`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            id: lookup("WEBAUTHN_RP_ID").unwrap_or(defaults.id),
            origin: lookup("WEBAUTHN_RP_ORIGIN").unwrap_or(defaults.origin),
            name: lookup("WEBAUTHN_RP_NAME").unwrap_or(defaults.name),
        }
    }
}

/// Built webauthn-rs instance for one relying party
pub struct WebAuthnConfig {
    webauthn: Webauthn,
    rp_id: String,
}

impl WebAuthnConfig {
    /// Binds `rp_id` to exactly `rp_origin`, subdomains excluded.
    pub fn new(rp_id: &str, rp_origin: &Url, rp_name: &str) -> Result<Self, WebauthnError> {
        let webauthn = WebauthnBuilder::new(rp_id, rp_origin)?
            .rp_name(rp_name)
            .allow_subdomains(false)
            .build()?;

        Ok(Self {
            webauthn,
            rp_id: rp_id.to_string(),
        })
    }

    pub fn from_relying_party(rp: &RelyingParty) -> Result<Self, ConfigError> {
        let origin = Url::parse(&rp.origin)
            .map_err(|e| ConfigError::InvalidOrigin(format!("{}: {}", rp.origin, e)))?;
        Self::new(&rp.id, &origin, &rp.name).map_err(ConfigError::Webauthn)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_relying_party(&RelyingParty::from_env())
    }

    pub fn webauthn(&self) -> &Webauthn {
        &self.webauthn
    }

    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }
}

impl std::fmt::Debug for WebAuthnConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebAuthnConfig")
            .field("rp_id", &self.rp_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_relying_party_builds() {
        let config = WebAuthnConfig::from_relying_party(&RelyingParty::default()).unwrap();
        let origin = Url::parse(DEFAULT_RP_ORIGIN).unwrap();
        assert!(config.webauthn().get_allowed_origins().contains(&origin));
        assert_eq!(config.rp_id(), "localhost");
    }

    #[test]
    fn test_lookup_overrides_defaults() {
        let rp = RelyingParty::from_lookup(|key| match key {
            "WEBAUTHN_RP_ID" => Some("example.com".to_string()),
            "WEBAUTHN_RP_ORIGIN" => Some("https://login.example.com".to_string()),
            _ => None,
        });
        assert_eq!(rp.id, "example.com");
        assert_eq!(rp.origin, "https://login.example.com");
        assert_eq!(rp.name, DEFAULT_RP_NAME);
        assert!(WebAuthnConfig::from_relying_party(&rp).is_ok());
    }

    #[test]
    fn test_config_rejects_foreign_origin() {
        // The RP id must be a registrable suffix of the origin's host
        let rp = RelyingParty {
            id: "example.com".to_string(),
            origin: "https://example.org".to_string(),
            name: "Test".to_string(),
        };
        assert!(matches!(
            WebAuthnConfig::from_relying_party(&rp),
            Err(ConfigError::Webauthn(_))
        ));
    }

    #[test]
    fn test_unparseable_origin() {
        let rp = RelyingParty {
            origin: "not a url".to_string(),
            ..RelyingParty::default()
        };
        assert!(matches!(
            WebAuthnConfig::from_relying_party(&rp),
            Err(ConfigError::InvalidOrigin(_))
        ));
    }
}
