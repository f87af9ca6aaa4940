//! PostgreSQL storage for users, credentials and ceremony sessions
//!
//! Per-key atomicity comes from row locks (`SELECT ... FOR UPDATE`) inside a
//! transaction, or from a single statement where one suffices.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use passkey_core::store::ttl_to_chrono;
use passkey_core::{
    CeremonyKind, Challenge, Credential, CredentialId, CredentialStore, Identity, NewSession,
    Session, SessionStore, SessionToken, StoreError, User,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

/// Idempotent schema bootstrap
const SCHEMA: &str = include_str!("../../schema.sql");

/// Connect a pool to `database_url`
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;

    tracing::info!(max_connections, "Connected to PostgreSQL database");
    Ok(pool)
}

/// Create the passkey tables if they do not exist yet
pub async fn bootstrap_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| StoreError::Query(format!("schema bootstrap failed: {}", e)))?;

    tracing::info!("Database schema ready");
    Ok(())
}

/// Map a sqlx error, surfacing unique violations as conflicts
fn query_error(e: sqlx::Error) -> StoreError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => StoreError::Conflict(db.message().to_string()),
        _ => StoreError::Query(e.to_string()),
    }
}

async fn ping(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;
    Ok(())
}

/// PostgreSQL-backed credential storage
#[derive(Clone)]
pub struct PostgresCredentialStore {
    pool: PgPool,
}

impl PostgresCredentialStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_credentials(
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        credentials: &[Credential],
    ) -> Result<(), StoreError> {
        for (position, credential) in credentials.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO passkey_credentials
                    (credential_id, user_id, position, public_key, sign_count,
                     created_at, last_used_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(credential.credential_id.as_bytes())
            .bind(user_id)
            .bind(position as i32)
            .bind(&credential.public_key)
            .bind(i64::from(credential.sign_count))
            .bind(credential.created_at)
            .bind(credential.last_used_at)
            .execute(&mut **tx)
            .await
            .map_err(query_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PostgresCredentialStore {
    async fn get_user(&self, username: &str) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, name, display_name, created_at, updated_at
            FROM passkey_users
            WHERE id = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?
        .ok_or(StoreError::NotFound)?;

        let credentials = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT credential_id, public_key, sign_count, created_at, last_used_at
            FROM passkey_credentials
            WHERE user_id = $1
            ORDER BY position
            "#,
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?
        .into_iter()
        .map(CredentialRow::into_credential)
        .collect::<Result<Vec<_>, _>>()?;

        User::from_parts(
            row.id,
            row.name,
            row.display_name,
            credentials,
            row.created_at,
            row.updated_at,
        )
        .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO passkey_users (id, name, display_name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(user.id())
        .bind(user.name())
        .bind(user.display_name())
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?
        .rows_affected();

        if inserted == 0 {
            return Err(StoreError::Conflict(format!("user {} already exists", user.id())));
        }

        Self::insert_credentials(&mut tx, user.id(), user.credentials()).await?;
        tx.commit().await.map_err(query_error)?;

        tracing::debug!(username = user.id(), "User stored in database");
        Ok(())
    }

    async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;

        let updated = sqlx::query(
            r#"
            UPDATE passkey_users
            SET name = $2, display_name = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(user.id())
        .bind(user.name())
        .bind(user.display_name())
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?
        .rows_affected();

        if updated == 0 {
            return Err(StoreError::NotFound);
        }

        sqlx::query("DELETE FROM passkey_credentials WHERE user_id = $1")
            .bind(user.id())
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

        Self::insert_credentials(&mut tx, user.id(), user.credentials()).await?;
        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn add_credential(
        &self,
        user_id: &str,
        credential: Credential,
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;

        // Serializes concurrent appends for the same user
        sqlx::query("SELECT id FROM passkey_users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_error)?
            .ok_or(StoreError::NotFound)?;

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM passkey_credentials WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(query_error)?;

        let position: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM passkey_credentials WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(query_error)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO passkey_credentials
                (credential_id, user_id, position, public_key, sign_count, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (credential_id) DO NOTHING
            "#,
        )
        .bind(credential.credential_id.as_bytes())
        .bind(user_id)
        .bind(position)
        .bind(&credential.public_key)
        .bind(i64::from(credential.sign_count))
        .bind(credential.created_at)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?
        .rows_affected();

        if inserted == 0 {
            return Err(StoreError::Conflict(format!(
                "credential {} already registered",
                credential.credential_id
            )));
        }

        sqlx::query("UPDATE passkey_users SET updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;

        tracing::debug!(
            username = user_id,
            credential_id = %credential.credential_id,
            "Credential stored in database"
        );
        Ok(count as usize + 1)
    }

    async fn record_sign_count(
        &self,
        user_id: &str,
        credential_id: &CredentialId,
        reported: u32,
        key_material: Option<Vec<u8>>,
    ) -> Result<u32, StoreError> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;

        let prior: i64 = sqlx::query_scalar(
            r#"
            SELECT sign_count FROM passkey_credentials
            WHERE credential_id = $1 AND user_id = $2
            FOR UPDATE
            "#,
        )
        .bind(credential_id.as_bytes())
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_error)?
        .ok_or(StoreError::NotFound)?;

        let prior = u32::try_from(prior)
            .map_err(|_| StoreError::Serialization(format!("sign_count {} out of range", prior)))?;

        if reported > prior {
            sqlx::query(
                r#"
                UPDATE passkey_credentials
                SET sign_count = $3,
                    public_key = COALESCE($4, public_key),
                    last_used_at = NOW()
                WHERE credential_id = $1 AND user_id = $2
                "#,
            )
            .bind(credential_id.as_bytes())
            .bind(user_id)
            .bind(i64::from(reported))
            .bind(key_material)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        } else {
            sqlx::query(
                r#"
                UPDATE passkey_credentials SET last_used_at = NOW()
                WHERE credential_id = $1 AND user_id = $2
                "#,
            )
            .bind(credential_id.as_bytes())
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        }

        tx.commit().await.map_err(query_error)?;
        Ok(prior)
    }

    async fn check_health(&self) -> Result<(), StoreError> {
        ping(&self.pool).await
    }
}

impl std::fmt::Debug for PostgresCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresCredentialStore")
            .field("pool", &"<PgPool>")
            .finish()
    }
}

/// PostgreSQL-backed session storage
#[derive(Clone)]
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn create_session(
        &self,
        session: NewSession,
        ttl: Duration,
    ) -> Result<SessionToken, StoreError> {
        let ttl = ttl_to_chrono(ttl)?;
        let token = SessionToken::generate()?;
        let created_at = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO passkey_sessions
                (token, user_id, kind, nonce, state, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(token.as_str())
        .bind(&session.user_id)
        .bind(session.kind.as_str())
        .bind(&session.challenge.nonce)
        .bind(&session.challenge.state)
        .bind(created_at)
        .bind(created_at + ttl)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(token)
    }

    async fn get_session(&self, token: &str) -> Result<Session, StoreError> {
        let session = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT token, user_id, kind, nonce, state, created_at, expires_at
            FROM passkey_sessions
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?
        .ok_or(StoreError::NotFound)?
        .into_session()?;

        if session.is_expired_at(Utc::now()) {
            self.delete_session(token).await?;
            return Err(StoreError::Expired);
        }
        Ok(session)
    }

    async fn consume_session(&self, token: &str) -> Result<Session, StoreError> {
        let session = sqlx::query_as::<_, SessionRow>(
            r#"
            DELETE FROM passkey_sessions
            WHERE token = $1
            RETURNING token, user_id, kind, nonce, state, created_at, expires_at
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?
        .ok_or(StoreError::NotFound)?
        .into_session()?;

        if session.is_expired_at(Utc::now()) {
            return Err(StoreError::Expired);
        }
        Ok(session)
    }

    async fn delete_session(&self, token: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM passkey_sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let purged = sqlx::query("DELETE FROM passkey_sessions WHERE expires_at < $1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(query_error)?
            .rows_affected();
        Ok(purged as usize)
    }

    async fn check_health(&self) -> Result<(), StoreError> {
        ping(&self.pool).await
    }
}

impl std::fmt::Debug for PostgresSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSessionStore")
            .field("pool", &"<PgPool>")
            .finish()
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    name: String,
    display_name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    credential_id: Vec<u8>,
    public_key: Vec<u8>,
    sign_count: i64,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

impl CredentialRow {
    fn into_credential(self) -> Result<Credential, StoreError> {
        let sign_count = u32::try_from(self.sign_count).map_err(|_| {
            StoreError::Serialization(format!("sign_count {} out of range", self.sign_count))
        })?;

        Ok(Credential {
            credential_id: CredentialId::new(self.credential_id),
            public_key: self.public_key,
            sign_count,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    token: String,
    user_id: String,
    kind: String,
    nonce: Vec<u8>,
    state: serde_json::Value,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SessionRow {
    fn into_session(self) -> Result<Session, StoreError> {
        let kind: CeremonyKind = self.kind.parse().map_err(StoreError::Serialization)?;

        Ok(Session {
            token: SessionToken::from(self.token),
            user_id: self.user_id,
            kind,
            challenge: Challenge {
                nonce: self.nonce,
                state: self.state,
            },
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(sign_count: i64, kind: &str) -> (CredentialRow, SessionRow) {
        let now = Utc::now();
        (
            CredentialRow {
                credential_id: vec![1, 2, 3],
                public_key: vec![9],
                sign_count,
                created_at: now,
                last_used_at: None,
            },
            SessionRow {
                token: "token".into(),
                user_id: "alice".into(),
                kind: kind.into(),
                nonce: vec![7; 32],
                state: serde_json::json!({}),
                created_at: now,
                expires_at: now,
            },
        )
    }

    #[test]
    fn test_credential_row_conversion() {
        let (credential, _) = row(42, "login");
        let credential = credential.into_credential().unwrap();
        assert_eq!(credential.credential_id, CredentialId::new(vec![1, 2, 3]));
        assert_eq!(credential.sign_count, 42);

        let (negative, _) = row(-1, "login");
        assert!(negative.into_credential().is_err());
    }

    #[test]
    fn test_session_row_conversion() {
        let (_, session) = row(0, "registration");
        let session = session.into_session().unwrap();
        assert_eq!(session.kind, CeremonyKind::Registration);
        assert_eq!(session.user_id, "alice");

        let (_, bad) = row(0, "logout");
        assert!(matches!(bad.into_session(), Err(StoreError::Serialization(_))));
    }

    #[test]
    fn test_schema_is_idempotent() {
        let sql: String = SCHEMA
            .lines()
            .filter(|l| !l.trim_start().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");

        for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            assert!(
                statement.contains("IF NOT EXISTS"),
                "non-idempotent statement: {}",
                statement
            );
        }
    }
}
