//! WebAuthn storage module
//!
//! Provides storage for:
//! - **Sessions**: ceremony challenge state between begin and finish, keyed by
//!   a random session ID and consumed exactly once. Expires after the
//!   configured TTL.
//! - **Credentials**: users and their registered passkeys.
//!
//! Both stores are PostgreSQL-backed when `DATABASE_URL` is set and fall back
//! to in-memory maps otherwise (useful for development, but everything is lost
//! on restart).

mod memory;
mod postgres;

pub use memory::{MemoryCredentialStore, MemorySessionStore};
pub use postgres::{PostgresCredentialStore, PostgresSessionStore};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use super::types::{Ceremony, StoredCredential, User, UserWithCredentials, VerifiedCredential};
use crate::config::Config;

/// Bytes of entropy in a session ID
const SESSION_ID_BYTES: usize = 32;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Entropy source unavailable: {0}")]
    Entropy(String),

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session payload is corrupt: {0}")]
    SessionCorrupt(String),

    #[error("Credential is registered to another user")]
    CredentialOwnerMismatch,
}

/// Generate an opaque session ID: 32 bytes from the OS, base64url without padding
pub fn generate_session_id() -> Result<String, StorageError> {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    getrandom::fill(&mut bytes).map_err(|e| StorageError::Entropy(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Persisted session row with an untyped challenge payload
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: String,
    pub username: String,
    pub ceremony: Ceremony,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A validated session with its challenge state decoded
#[derive(Debug, Clone)]
pub struct CeremonySession<T> {
    pub session_id: String,
    pub username: String,
    pub ceremony: Ceremony,
    pub challenge: T,
    pub created_at: DateTime<Utc>,
}

enum SessionBackend {
    Postgres(PostgresSessionStore),
    Memory(MemorySessionStore),
}

/// Ceremony session storage with TTL-based expiry
pub struct SessionStore {
    backend: SessionBackend,
    ttl: chrono::Duration,
}

impl SessionStore {
    pub fn in_memory(ttl_secs: u64) -> Self {
        Self {
            backend: SessionBackend::Memory(MemorySessionStore::new()),
            ttl: ttl_from_secs(ttl_secs),
        }
    }

    pub fn postgres(store: PostgresSessionStore, ttl_secs: u64) -> Self {
        Self {
            backend: SessionBackend::Postgres(store),
            ttl: ttl_from_secs(ttl_secs),
        }
    }

    /// Persist challenge state under a freshly generated session ID
    pub async fn save<T: Serialize>(
        &self,
        username: &str,
        ceremony: Ceremony,
        challenge: &T,
    ) -> Result<String, StorageError> {
        let payload = serde_json::to_value(challenge)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let record = SessionRecord {
            session_id: generate_session_id()?,
            username: username.to_string(),
            ceremony,
            payload,
            created_at: Utc::now(),
        };

        match &self.backend {
            SessionBackend::Postgres(pg) => pg.insert(&record).await?,
            SessionBackend::Memory(mem) => mem.insert(record.clone()),
        }

        tracing::debug!(
            session_id = %record.session_id,
            username = %record.username,
            ceremony = %ceremony,
            "Ceremony session saved"
        );
        Ok(record.session_id)
    }

    /// Load a session for the given ceremony, treating expired or mismatched rows as absent
    pub async fn load_and_validate<T: DeserializeOwned>(
        &self,
        session_id: &str,
        ceremony: Ceremony,
    ) -> Result<CeremonySession<T>, StorageError> {
        let record = match &self.backend {
            SessionBackend::Postgres(pg) => pg.get(session_id).await?,
            SessionBackend::Memory(mem) => mem.get(session_id),
        }
        .ok_or(StorageError::SessionNotFound)?;

        if record.ceremony != ceremony {
            tracing::debug!(
                session_id = %session_id,
                expected = %ceremony,
                actual = %record.ceremony,
                "Session belongs to another ceremony"
            );
            return Err(StorageError::SessionNotFound);
        }

        if self.is_expired(record.created_at, Utc::now()) {
            return Err(StorageError::SessionNotFound);
        }

        let challenge = serde_json::from_value(record.payload)
            .map_err(|e| StorageError::SessionCorrupt(e.to_string()))?;

        Ok(CeremonySession {
            session_id: record.session_id,
            username: record.username,
            ceremony: record.ceremony,
            challenge,
            created_at: record.created_at,
        })
    }

    /// Delete a session. Returns whether this call removed it.
    pub async fn remove(&self, session_id: &str) -> Result<bool, StorageError> {
        match &self.backend {
            SessionBackend::Postgres(pg) => pg.delete(session_id).await,
            SessionBackend::Memory(mem) => Ok(mem.delete(session_id)),
        }
    }

    /// Remove every session older than the TTL
    pub async fn purge_expired(&self) -> Result<usize, StorageError> {
        let cutoff = Utc::now() - self.ttl;
        match &self.backend {
            SessionBackend::Postgres(pg) => pg.delete_older_than(cutoff).await,
            SessionBackend::Memory(mem) => Ok(mem.delete_older_than(cutoff)),
        }
    }

    /// Number of stored sessions, including expired ones not yet purged
    pub async fn count(&self) -> Result<usize, StorageError> {
        match &self.backend {
            SessionBackend::Postgres(pg) => pg.count().await,
            SessionBackend::Memory(mem) => Ok(mem.len()),
        }
    }

    fn is_expired(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        created_at + self.ttl <= now
    }
}

/// Upper bound on the session TTL (one year)
const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

fn ttl_from_secs(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_TTL_SECS) as i64)
}

enum CredentialBackend {
    Postgres(PostgresCredentialStore),
    Memory(MemoryCredentialStore),
}

/// Users and their registered credentials
pub struct CredentialStore {
    backend: CredentialBackend,
}

impl CredentialStore {
    pub fn in_memory() -> Self {
        Self {
            backend: CredentialBackend::Memory(MemoryCredentialStore::new()),
        }
    }

    pub fn postgres(store: PostgresCredentialStore) -> Self {
        Self {
            backend: CredentialBackend::Postgres(store),
        }
    }

    /// Return the user with this username, creating it on first sight.
    /// An existing user keeps its original display name.
    pub async fn find_or_create_user(
        &self,
        username: &str,
        display_name: &str,
    ) -> Result<User, StorageError> {
        match &self.backend {
            CredentialBackend::Postgres(pg) => pg.find_or_create_user(username, display_name).await,
            CredentialBackend::Memory(mem) => Ok(mem.find_or_create_user(username, display_name)),
        }
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StorageError> {
        match &self.backend {
            CredentialBackend::Postgres(pg) => pg.get_user_by_username(username).await,
            CredentialBackend::Memory(mem) => Ok(mem.get_user_by_username(username)),
        }
    }

    pub async fn get_user_with_credentials(
        &self,
        username: &str,
    ) -> Result<Option<UserWithCredentials>, StorageError> {
        match &self.backend {
            CredentialBackend::Postgres(pg) => pg.get_user_with_credentials(username).await,
            CredentialBackend::Memory(mem) => Ok(mem.get_user_with_credentials(username)),
        }
    }

    /// Credentials registered to a user, or `None` when the user does not exist
    pub async fn list_credentials(
        &self,
        username: &str,
    ) -> Result<Option<Vec<StoredCredential>>, StorageError> {
        Ok(self
            .get_user_with_credentials(username)
            .await?
            .map(|u| u.credentials))
    }

    /// Create or update the row for `credential.credential_id`, atomically per ID
    pub async fn upsert_credential(
        &self,
        credential: &VerifiedCredential,
        user: &User,
    ) -> Result<StoredCredential, StorageError> {
        let stored = match &self.backend {
            CredentialBackend::Postgres(pg) => pg.upsert_credential(credential, user).await?,
            CredentialBackend::Memory(mem) => mem.upsert_credential(credential, user)?,
        };

        tracing::debug!(
            credential_id = %stored.credential_id_b64(),
            username = %user.username,
            sign_count = stored.credential.sign_count,
            "Credential upserted"
        );
        Ok(stored)
    }

    /// Set the sticky clone-warning bit. Returns false if the credential is unknown.
    pub async fn mark_clone_warning(&self, credential_id: &[u8]) -> Result<bool, StorageError> {
        match &self.backend {
            CredentialBackend::Postgres(pg) => pg.mark_clone_warning(credential_id).await,
            CredentialBackend::Memory(mem) => Ok(mem.mark_clone_warning(credential_id)),
        }
    }

    pub async fn credential_count(&self) -> Result<usize, StorageError> {
        match &self.backend {
            CredentialBackend::Postgres(pg) => pg.credential_count().await,
            CredentialBackend::Memory(mem) => Ok(mem.credential_count()),
        }
    }
}

/// Session and credential storage sharing one backend choice
pub struct Storage {
    pub sessions: SessionStore,
    pub credentials: CredentialStore,
}

impl Storage {
    /// Create storage with PostgreSQL backend and run migrations
    pub async fn with_postgres(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        session_ttl_secs: u64,
    ) -> Result<Self, StorageError> {
        let pool = postgres::connect(database_url, max_connections, min_connections).await?;
        postgres::migrate(&pool).await?;

        Ok(Self {
            sessions: SessionStore::postgres(
                PostgresSessionStore::from_pool(pool.clone()),
                session_ttl_secs,
            ),
            credentials: CredentialStore::postgres(PostgresCredentialStore::from_pool(pool)),
        })
    }

    /// Create storage with in-memory backend (development only)
    pub fn in_memory(session_ttl_secs: u64) -> Self {
        Self {
            sessions: SessionStore::in_memory(session_ttl_secs),
            credentials: CredentialStore::in_memory(),
        }
    }

    /// Create storage from config
    ///
    /// Uses PostgreSQL if `DATABASE_URL` is set, otherwise falls back to in-memory.
    pub async fn from_config(config: &Config) -> Result<Self, StorageError> {
        match &config.database_url {
            Some(url) => {
                tracing::info!("Using PostgreSQL passkey storage");
                Self::with_postgres(
                    url,
                    config.database_max_connections,
                    config.database_min_connections,
                    config.session_ttl_secs,
                )
                .await
            }
            None => {
                tracing::warn!(
                    "DATABASE_URL not set, using in-memory storage - passkeys will be lost on restart!"
                );
                Ok(Self::in_memory(config.session_ttl_secs))
            }
        }
    }

    /// Check if using persistent storage
    pub fn is_persistent(&self) -> bool {
        matches!(self.credentials.backend, CredentialBackend::Postgres(_))
    }

    /// Check database health (always Ok for memory backend)
    pub async fn check_health(&self) -> Result<(), StorageError> {
        match &self.credentials.backend {
            CredentialBackend::Postgres(pg) => pg.check_health().await,
            CredentialBackend::Memory(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = if self.is_persistent() {
            "PostgreSQL"
        } else {
            "Memory"
        };
        f.debug_struct("Storage").field("backend", &backend).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Challenge {
        nonce: String,
    }

    fn challenge() -> Challenge {
        Challenge {
            nonce: "n-1".to_string(),
        }
    }

    #[test]
    fn test_session_id_format() {
        let id = generate_session_id().unwrap();
        assert_eq!(id.len(), 43);
        assert!(!id.contains('='));
        assert_eq!(URL_SAFE_NO_PAD.decode(&id).unwrap().len(), 32);
        assert_ne!(id, generate_session_id().unwrap());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = SessionStore::in_memory(300);
        let id = store
            .save("alice", Ceremony::Registration, &challenge())
            .await
            .unwrap();

        let session: CeremonySession<Challenge> = store
            .load_and_validate(&id, Ceremony::Registration)
            .await
            .unwrap();
        assert_eq!(session.username, "alice");
        assert_eq!(session.challenge, challenge());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_session_id_independent_of_username() {
        let store = SessionStore::in_memory(300);
        let a = store.save("alice", Ceremony::Registration, &challenge()).await.unwrap();
        let b = store.save("alice", Ceremony::Registration, &challenge()).await.unwrap();
        assert_ne!(a, b);
        assert!(!a.contains("alice"));
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_wrong_ceremony_is_not_found() {
        let store = SessionStore::in_memory(300);
        let id = store
            .save("alice", Ceremony::Registration, &challenge())
            .await
            .unwrap();

        let err = store
            .load_and_validate::<Challenge>(&id, Ceremony::Authentication)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SessionNotFound));
    }

    #[tokio::test]
    async fn test_expired_session_is_not_found() {
        let store = SessionStore::in_memory(0);
        let id = store
            .save("alice", Ceremony::Authentication, &challenge())
            .await
            .unwrap();

        let err = store
            .load_and_validate::<Challenge>(&id, Ceremony::Authentication)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SessionNotFound));
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_payload() {
        let store = SessionStore::in_memory(300);
        let id = store
            .save("alice", Ceremony::Registration, &serde_json::json!({"other": 1}))
            .await
            .unwrap();

        let err = store
            .load_and_validate::<Challenge>(&id, Ceremony::Registration)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SessionCorrupt(_)));
    }

    #[tokio::test]
    async fn test_remove_is_single_use() {
        let store = SessionStore::in_memory(300);
        let id = store
            .save("alice", Ceremony::Registration, &challenge())
            .await
            .unwrap();

        assert!(store.remove(&id).await.unwrap());
        assert!(!store.remove(&id).await.unwrap());
        assert!(matches!(
            store
                .load_and_validate::<Challenge>(&id, Ceremony::Registration)
                .await,
            Err(StorageError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_purge_keeps_live_sessions() {
        let store = SessionStore::in_memory(300);
        store
            .save("alice", Ceremony::Registration, &challenge())
            .await
            .unwrap();
        assert_eq!(store.purge_expired().await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_storage() {
        let storage = Storage::in_memory(300);
        assert!(!storage.is_persistent());
        assert!(storage.check_health().await.is_ok());
        assert!(storage
            .credentials
            .list_credentials("nobody")
            .await
            .unwrap()
            .is_none());
    }
}
