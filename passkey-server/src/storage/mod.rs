//! Credential and session storage backends
//!
//! Provides storage for:
//! - **Credentials** (PostgreSQL): users and their passkeys survive restarts.
//! - **Sessions** (PostgreSQL): pending ceremonies are shared by every server
//!   instance behind the same database.
//!
//! If `DATABASE_URL` is not set, falls back to in-memory storage for both
//! (useful for development, but everything is lost on restart).

mod postgres;

pub use postgres::{bootstrap_schema, connect, PostgresCredentialStore, PostgresSessionStore};

use std::sync::Arc;

use passkey_core::{
    CredentialStore, MemoryCredentialStore, MemorySessionStore, SessionStore, StoreError,
};

use crate::config::Config;

/// The pair of stores the ceremony engine runs on
#[derive(Clone)]
pub struct Stores {
    pub credentials: Arc<dyn CredentialStore>,
    pub sessions: Arc<dyn SessionStore>,
    persistent: bool,
}

impl Stores {
    /// Create stores with PostgreSQL backend, bootstrapping the schema
    pub async fn with_postgres(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = connect(database_url, max_connections).await?;
        bootstrap_schema(&pool).await?;

        Ok(Self {
            credentials: Arc::new(PostgresCredentialStore::from_pool(pool.clone())),
            sessions: Arc::new(PostgresSessionStore::from_pool(pool)),
            persistent: true,
        })
    }

    /// Create stores with in-memory backend (development only)
    pub fn in_memory() -> Self {
        tracing::warn!("Using in-memory passkey storage - credentials will be lost on restart!");
        Self {
            credentials: Arc::new(MemoryCredentialStore::new()),
            sessions: Arc::new(MemorySessionStore::new()),
            persistent: false,
        }
    }

    /// Create stores from environment
    ///
    /// Uses PostgreSQL if `DATABASE_URL` is set, otherwise falls back to in-memory.
    pub async fn from_env(config: &Config) -> Result<Self, StoreError> {
        match std::env::var("DATABASE_URL") {
            Ok(url) if !url.is_empty() => {
                tracing::info!("Using PostgreSQL passkey storage");
                Self::with_postgres(&url, config.database_max_connections).await
            }
            _ => {
                tracing::warn!("DATABASE_URL not set, using in-memory storage");
                Ok(Self::in_memory())
            }
        }
    }

    /// Check if using persistent storage
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores")
            .field("persistent", &self.persistent)
            .finish_non_exhaustive()
    }
}
