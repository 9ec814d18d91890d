//! In-memory storage backends
//!
//! Used when no database is configured and in tests. Per-key atomicity comes
//! from the DashMap shard locks held by the entry API.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{SessionRecord, StorageError};
use crate::webauthn::types::{StoredCredential, User, UserWithCredentials, VerifiedCredential};

/// In-memory ceremony sessions keyed by session ID
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, SessionRecord>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: SessionRecord) {
        self.sessions.insert(record.session_id.clone(), record);
    }

    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    pub fn delete(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn delete_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, record| record.created_at > cutoff);
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

impl std::fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySessionStore")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

/// In-memory users and credentials
#[derive(Default)]
pub struct MemoryCredentialStore {
    /// username -> user
    users: DashMap<String, User>,
    /// credential ID -> credential
    credentials: DashMap<Vec<u8>, StoredCredential>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_or_create_user(&self, username: &str, display_name: &str) -> User {
        self.users
            .entry(username.to_string())
            .or_insert_with(|| User::new(username, display_name))
            .value()
            .clone()
    }

    pub fn get_user_by_username(&self, username: &str) -> Option<User> {
        self.users.get(username).map(|entry| entry.value().clone())
    }

    pub fn get_user_with_credentials(&self, username: &str) -> Option<UserWithCredentials> {
        let user = self.get_user_by_username(username)?;
        let mut credentials: Vec<StoredCredential> = self
            .credentials
            .iter()
            .filter(|entry| entry.value().user_id == user.id)
            .map(|entry| entry.value().clone())
            .collect();
        credentials.sort_by_key(|c| c.created_at);

        Some(UserWithCredentials { user, credentials })
    }

    pub fn upsert_credential(
        &self,
        credential: &VerifiedCredential,
        user: &User,
    ) -> Result<StoredCredential, StorageError> {
        let now = Utc::now();
        match self.credentials.entry(credential.credential_id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().user_id != user.id {
                    return Err(StorageError::CredentialOwnerMismatch);
                }
                entry.get_mut().merge(credential, now);
                Ok(entry.get().clone())
            }
            Entry::Vacant(entry) => {
                let stored = StoredCredential::from_verified(user.id, credential.clone(), now);
                entry.insert(stored.clone());
                Ok(stored)
            }
        }
    }

    pub fn mark_clone_warning(&self, credential_id: &[u8]) -> bool {
        match self.credentials.get_mut(credential_id) {
            Some(mut entry) => {
                entry.credential.clone_warning = true;
                true
            }
            None => false,
        }
    }

    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }
}

impl std::fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCredentialStore")
            .field("users", &self.users.len())
            .field("credentials", &self.credentials.len())
            .finish()
    }
}
