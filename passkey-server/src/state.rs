//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;
use std::time::Duration;

use passkey_core::{AuthenticatorVerifier, CeremonyEngine, SessionStore};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::storage::Stores;

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    /// Passkey ceremony engine
    pub engine: Arc<CeremonyEngine>,
    /// Session store, for the expiry sweep
    pub sessions: Arc<dyn SessionStore>,
    /// Whether credentials survive a restart
    pub persistent_storage: bool,
}

impl AppState {
    pub fn new(stores: Stores, verifier: Arc<dyn AuthenticatorVerifier>, config: &Config) -> Self {
        let persistent_storage = stores.is_persistent();
        let engine = CeremonyEngine::new(
            stores.credentials,
            stores.sessions.clone(),
            verifier,
            config.ceremony_config(),
        )
        .with_clone_policy(Arc::new(config.clone_policy));

        tracing::info!(
            registration_ttl_secs = config.registration_ttl_secs,
            login_ttl_secs = config.login_ttl_secs,
            clone_policy = %config.clone_policy,
            "Ceremony engine ready"
        );

        Self {
            engine: Arc::new(engine),
            sessions: stores.sessions,
            persistent_storage,
        }
    }

    /// Periodically delete expired sessions in the background
    pub fn spawn_session_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match sessions.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => tracing::debug!(purged, "Purged expired sessions"),
                    Err(e) => tracing::error!(error = %e, "Session sweep failed"),
                }
            }
        })
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("engine", &self.engine)
            .field("persistent_storage", &self.persistent_storage)
            .finish()
    }
}
