//! Server configuration module
//!
//! Handles loading configuration from environment variables with sensible defaults.

use std::net::SocketAddr;
use std::time::Duration;

use passkey_core::{CeremonyConfig, CloneAction, DEFAULT_MAX_USERNAME_LEN};

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 3000)
    pub port: u16,
    /// Server host (default: 127.0.0.1)
    pub host: [u8; 4],
    /// Allowed CORS origins, comma-separated (default: allow all in dev)
    pub allowed_origins: Option<Vec<String>>,
    /// Request body limit in KB (default: 64)
    pub body_limit_kb: usize,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Enable rate limiting (default: false for tests, true when loaded from env)
    pub rate_limit_enabled: bool,
    /// Rate limit: requests per second (default: 10)
    pub rate_limit_per_sec: u64,
    /// Rate limit: burst size (default: 20)
    pub rate_limit_burst: u32,
    /// Database connection pool maximum connections (default: 20)
    pub database_max_connections: u32,
    /// Registration session lifetime in seconds (default: 300)
    pub registration_ttl_secs: u64,
    /// Login session lifetime in seconds (default: 300)
    pub login_ttl_secs: u64,
    /// Interval between expired session sweeps in seconds (default: 60)
    pub session_sweep_interval_secs: u64,
    /// What to do when a signature counter fails to advance (default: accept)
    pub clone_policy: CloneAction,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            host: [127, 0, 0, 1],
            allowed_origins: None, // None = allow all (dev mode)
            body_limit_kb: 64,
            timeout_secs: 30,
            rate_limit_enabled: false, // Disabled by default (for tests)
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
            database_max_connections: 20,
            registration_ttl_secs: 300,
            login_ttl_secs: 300,
            session_sweep_interval_secs: 60,
            clone_policy: CloneAction::Accept,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = std::env::var("HOST")
            .ok()
            .map(|h| {
                if h == "0.0.0.0" {
                    [0, 0, 0, 0]
                } else {
                    [127, 0, 0, 1]
                }
            })
            .unwrap_or(defaults.host);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS").ok().map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        // Rate limiting enabled by default in production, can be disabled with RATE_LIMIT_ENABLED=false
        let rate_limit_enabled = std::env::var("RATE_LIMIT_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let clone_policy = match std::env::var("CLONE_POLICY") {
            Ok(v) => v.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Ignoring CLONE_POLICY, falling back to accept");
                CloneAction::Accept
            }),
            Err(_) => defaults.clone_policy,
        };

        Self {
            port: env_parse("PORT").unwrap_or(defaults.port),
            host,
            allowed_origins,
            body_limit_kb: env_parse("BODY_LIMIT_KB").unwrap_or(defaults.body_limit_kb),
            timeout_secs: env_parse("REQUEST_TIMEOUT_SECS").unwrap_or(defaults.timeout_secs),
            rate_limit_enabled,
            rate_limit_per_sec: env_parse("RATE_LIMIT_PER_SEC")
                .unwrap_or(defaults.rate_limit_per_sec),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST").unwrap_or(defaults.rate_limit_burst),
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            registration_ttl_secs: env_parse("REGISTRATION_TTL_SECS")
                .filter(|&secs: &u64| secs > 0)
                .unwrap_or(defaults.registration_ttl_secs),
            login_ttl_secs: env_parse("LOGIN_TTL_SECS")
                .filter(|&secs: &u64| secs > 0)
                .unwrap_or(defaults.login_ttl_secs),
            session_sweep_interval_secs: env_parse("SESSION_SWEEP_INTERVAL_SECS")
                .filter(|&secs: &u64| secs > 0)
                .unwrap_or(defaults.session_sweep_interval_secs),
            clone_policy,
        }
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.host, self.port))
    }

    /// Engine settings derived from this config
    pub fn ceremony_config(&self) -> CeremonyConfig {
        CeremonyConfig {
            registration_ttl: Duration::from_secs(self.registration_ttl_secs),
            login_ttl: Duration::from_secs(self.login_ttl_secs),
            max_username_len: DEFAULT_MAX_USERNAME_LEN,
        }
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval_secs)
    }
}
