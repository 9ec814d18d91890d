//! PostgreSQL storage for users, credentials and ceremony sessions

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::{SessionRecord, StorageError};
use crate::webauthn::types::{
    Attachment, AttestationType, Ceremony, CredentialFlags, StoredCredential, Transport, User,
    UserWithCredentials, VerifiedCredential,
};

const CREDENTIAL_COLUMNS: &str = r#"
    id, credential_id, user_id, public_key, attestation_type, transports,
    user_present, user_verified, backup_eligible, backup_state,
    aaguid, sign_count, clone_warning, attachment,
    client_data_hash, authenticator_data, attestation_object, public_key_algorithm,
    passkey_data, created_at, last_used_at
"#;

/// Open a connection pool
pub async fn connect(
    database_url: &str,
    max_connections: u32,
    min_connections: u32,
) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(min_connections)
        .connect(database_url)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

    tracing::info!(
        max_connections,
        min_connections,
        "Connected to PostgreSQL database"
    );
    Ok(pool)
}

/// Run database migrations
pub async fn migrate(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

    tracing::info!("Database migrations completed");
    Ok(())
}

fn query_error(e: sqlx::Error) -> StorageError {
    StorageError::Query(e.to_string())
}

/// PostgreSQL-backed ceremony sessions
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, record: &SessionRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO webauthn_sessions (session_id, username, ceremony, session_data, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.session_id)
        .bind(&record.username)
        .bind(record.ceremony.as_str())
        .bind(&record.payload)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, StorageError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT session_id, username, ceremony, session_data, created_at
            FROM webauthn_sessions
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.map(SessionRow::into_record).transpose()
    }

    pub async fn delete(&self, session_id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM webauthn_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let result = sqlx::query("DELETE FROM webauthn_sessions WHERE created_at <= $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected() as usize)
    }

    pub async fn count(&self) -> Result<usize, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM webauthn_sessions")
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(count as usize)
    }
}

impl std::fmt::Debug for PostgresSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSessionStore")
            .field("pool", &"<PgPool>")
            .finish()
    }
}

/// PostgreSQL-backed users and credentials
pub struct PostgresCredentialStore {
    pool: PgPool,
}

impl PostgresCredentialStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Check database connection health
    pub async fn check_health(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }

    pub async fn find_or_create_user(
        &self,
        username: &str,
        display_name: &str,
    ) -> Result<User, StorageError> {
        // The no-op update makes RETURNING yield the existing row on conflict
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, display_name)
            VALUES ($1, $2)
            ON CONFLICT (username) DO UPDATE SET username = EXCLUDED.username
            RETURNING id, username, display_name, created_at
            "#,
        )
        .bind(username)
        .bind(display_name)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StorageError> {
        sqlx::query_as::<_, User>(
            "SELECT id, username, display_name, created_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)
    }

    pub async fn get_user_with_credentials(
        &self,
        username: &str,
    ) -> Result<Option<UserWithCredentials>, StorageError> {
        let Some(user) = self.get_user_by_username(username).await? else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, CredentialRow>(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM webauthn_credentials WHERE user_id = $1 ORDER BY created_at"
        ))
        .bind(user.id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        let credentials = rows
            .into_iter()
            .map(CredentialRow::into_stored)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(UserWithCredentials { user, credentials }))
    }

    /// Insert or update a credential in one statement.
    ///
    /// The conflict branch only touches counter, flags, transports (when the
    /// new list is non-empty), the verifier blob and last-used time. The clone
    /// bit is OR-ed so it never clears. A row owned by another user is left
    /// untouched and no row is returned.
    pub async fn upsert_credential(
        &self,
        credential: &VerifiedCredential,
        user: &User,
    ) -> Result<StoredCredential, StorageError> {
        let transports: Vec<String> = credential
            .transports
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();

        let row = sqlx::query_as::<_, CredentialRow>(&format!(
            r#"
            INSERT INTO webauthn_credentials
                (credential_id, user_id, public_key, attestation_type, transports,
                 user_present, user_verified, backup_eligible, backup_state,
                 aaguid, sign_count, clone_warning, attachment,
                 client_data_hash, authenticator_data, attestation_object,
                 public_key_algorithm, passkey_data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (credential_id) DO UPDATE SET
                public_key = EXCLUDED.public_key,
                public_key_algorithm = EXCLUDED.public_key_algorithm,
                attestation_type = EXCLUDED.attestation_type,
                aaguid = EXCLUDED.aaguid,
                attachment = EXCLUDED.attachment,
                client_data_hash = EXCLUDED.client_data_hash,
                authenticator_data = EXCLUDED.authenticator_data,
                attestation_object = EXCLUDED.attestation_object,
                sign_count = EXCLUDED.sign_count,
                clone_warning = webauthn_credentials.clone_warning OR EXCLUDED.clone_warning,
                user_present = EXCLUDED.user_present,
                user_verified = EXCLUDED.user_verified,
                backup_eligible = EXCLUDED.backup_eligible,
                backup_state = EXCLUDED.backup_state,
                transports = CASE
                    WHEN cardinality(EXCLUDED.transports) > 0 THEN EXCLUDED.transports
                    ELSE webauthn_credentials.transports
                END,
                passkey_data = EXCLUDED.passkey_data,
                last_used_at = NOW()
            WHERE webauthn_credentials.user_id = EXCLUDED.user_id
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        ))
        .bind(&credential.credential_id)
        .bind(user.id)
        .bind(&credential.public_key)
        .bind(credential.attestation_type.as_str())
        .bind(&transports)
        .bind(credential.flags.user_present)
        .bind(credential.flags.user_verified)
        .bind(credential.flags.backup_eligible)
        .bind(credential.flags.backup_state)
        .bind(&credential.aaguid)
        .bind(i64::from(credential.sign_count))
        .bind(credential.clone_warning)
        .bind(credential.attachment.as_str())
        .bind(&credential.client_data_hash)
        .bind(&credential.authenticator_data)
        .bind(&credential.attestation_object)
        .bind(credential.public_key_algorithm)
        .bind(&credential.passkey)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.ok_or(StorageError::CredentialOwnerMismatch)?
            .into_stored()
    }

    pub async fn mark_clone_warning(&self, credential_id: &[u8]) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE webauthn_credentials SET clone_warning = TRUE WHERE credential_id = $1",
        )
        .bind(credential_id)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    /// Get total credential count (for stats)
    pub async fn credential_count(&self) -> Result<usize, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM webauthn_credentials")
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(count as usize)
    }
}

impl std::fmt::Debug for PostgresCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresCredentialStore")
            .field("pool", &"<PgPool>")
            .finish()
    }
}

/// Database row for sessions
#[derive(sqlx::FromRow)]
struct SessionRow {
    session_id: String,
    username: String,
    ceremony: String,
    session_data: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl SessionRow {
    fn into_record(self) -> Result<SessionRecord, StorageError> {
        let ceremony = Ceremony::parse(&self.ceremony).ok_or_else(|| {
            StorageError::SessionCorrupt(format!("unknown ceremony `{}`", self.ceremony))
        })?;

        Ok(SessionRecord {
            session_id: self.session_id,
            username: self.username,
            ceremony,
            payload: self.session_data,
            created_at: self.created_at,
        })
    }
}

/// Database row for credentials
#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    credential_id: Vec<u8>,
    user_id: Uuid,
    public_key: Vec<u8>,
    attestation_type: String,
    transports: Vec<String>,
    user_present: bool,
    user_verified: bool,
    backup_eligible: bool,
    backup_state: bool,
    aaguid: Vec<u8>,
    sign_count: i64,
    clone_warning: bool,
    attachment: String,
    client_data_hash: Vec<u8>,
    authenticator_data: Vec<u8>,
    attestation_object: Vec<u8>,
    public_key_algorithm: i64,
    passkey_data: serde_json::Value,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
}

impl CredentialRow {
    fn into_stored(self) -> Result<StoredCredential, StorageError> {
        let sign_count = u32::try_from(self.sign_count).map_err(|_| {
            StorageError::Serialization(format!("sign_count out of range: {}", self.sign_count))
        })?;

        Ok(StoredCredential {
            id: self.id,
            user_id: self.user_id,
            credential: VerifiedCredential {
                credential_id: self.credential_id,
                public_key: self.public_key,
                public_key_algorithm: self.public_key_algorithm,
                attestation_type: AttestationType::from_fmt(&self.attestation_type),
                transports: Transport::parse_all(self.transports.iter().map(String::as_str)),
                flags: CredentialFlags {
                    user_present: self.user_present,
                    user_verified: self.user_verified,
                    backup_eligible: self.backup_eligible,
                    backup_state: self.backup_state,
                },
                aaguid: self.aaguid,
                sign_count,
                clone_warning: self.clone_warning,
                attachment: Attachment::parse(&self.attachment),
                client_data_hash: self.client_data_hash,
                authenticator_data: self.authenticator_data,
                attestation_object: self.attestation_object,
                passkey: self.passkey_data,
            },
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        })
    }
}
