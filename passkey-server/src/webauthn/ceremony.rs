//! Ceremony orchestration
//!
//! Turns the two-request WebAuthn ceremonies into single-use state
//! transitions. A session moves from issued to consumed exactly once: Finish
//! removes the session row before the verifier runs, so a failed or replayed
//! Finish always needs a fresh Begin.

use std::sync::Arc;

use axum::http::StatusCode;
use serde::de::DeserializeOwned;

use super::storage::{CeremonySession, Storage, StorageError};
use super::types::{Ceremony, StoredCredential, User, VerifiedCredential};
use super::verifier::{PasskeyVerifier, VerifierError};
use crate::validation::{validate_display_name, validate_username};

/// Failure taxonomy shared by all four ceremony steps
#[derive(Debug, thiserror::Error)]
pub enum CeremonyError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing {0} session cookie")]
    MissingSessionCookie(Ceremony),

    #[error("No pending {0} session")]
    SessionNotFound(Ceremony),

    #[error("Corrupt {ceremony} session: {reason}")]
    SessionCorrupt { ceremony: Ceremony, reason: String },

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("{ceremony} verification failed: {reason}")]
    VerificationFailed { ceremony: Ceremony, reason: String },

    #[error("Storage failure: {0}")]
    StorageFailure(String),
}

impl CeremonyError {
    /// Taxonomy name reported as `kind` in error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "InvalidInput",
            Self::MissingSessionCookie(_) => "MissingSessionCookie",
            Self::SessionNotFound(_) => "SessionNotFound",
            Self::SessionCorrupt { .. } => "SessionCorrupt",
            Self::UserNotFound(_) => "UserNotFound",
            Self::VerificationFailed { .. } => "VerificationFailed",
            Self::StorageFailure(_) => "StorageFailure",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::MissingSessionCookie(_) => "MISSING_SESSION_COOKIE",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::SessionCorrupt { .. } => "SESSION_CORRUPT",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::VerificationFailed { .. } => "VERIFICATION_FAILED",
            Self::StorageFailure(_) => "STORAGE_FAILURE",
        }
    }

    /// Registration failures are 400s; authentication failures are 401s
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::MissingSessionCookie(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(ceremony)
            | Self::SessionCorrupt { ceremony, .. }
            | Self::VerificationFailed { ceremony, .. } => match ceremony {
                Ceremony::Registration => StatusCode::BAD_REQUEST,
                Ceremony::Authentication => StatusCode::UNAUTHORIZED,
            },
            Self::UserNotFound(_) => StatusCode::NOT_FOUND,
            Self::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to clients
    pub fn client_message(&self) -> String {
        match self {
            Self::InvalidInput(msg) => msg.clone(),
            Self::MissingSessionCookie(_) => "Session cookie is missing".to_string(),
            Self::SessionNotFound(_) => "Session expired or not found".to_string(),
            Self::SessionCorrupt { .. } => "Session is invalid".to_string(),
            Self::UserNotFound(_) => "User not found".to_string(),
            Self::VerificationFailed {
                ceremony: Ceremony::Registration,
                ..
            } => "Registration could not be verified".to_string(),
            Self::VerificationFailed {
                ceremony: Ceremony::Authentication,
                ..
            } => "Authentication failed".to_string(),
            Self::StorageFailure(_) => "Internal server error".to_string(),
        }
    }

    fn from_storage(error: StorageError) -> Self {
        Self::StorageFailure(error.to_string())
    }

    fn from_verifier(ceremony: Ceremony, error: VerifierError) -> Self {
        match error {
            VerifierError::MalformedResponse(msg) => {
                Self::InvalidInput(format!("Malformed {} response: {}", ceremony, msg))
            }
            VerifierError::Challenge(msg) | VerifierError::CorruptCredential(msg) => {
                Self::StorageFailure(msg)
            }
            other => Self::VerificationFailed {
                ceremony,
                reason: other.to_string(),
            },
        }
    }
}

/// Output of a Begin step: options for the client and the session to cookie
#[derive(Debug)]
pub struct CeremonyStart<O> {
    pub options: O,
    pub session_id: String,
}

/// Output of a successful authentication
#[derive(Debug)]
pub struct LoginOutcome {
    pub user: User,
    pub credential: StoredCredential,
    /// This assertion's counter did not advance
    pub clone_warning: bool,
}

/// Runs the registration and authentication ceremonies
pub struct CeremonyOrchestrator<V> {
    verifier: V,
    storage: Arc<Storage>,
}

impl<V: PasskeyVerifier> CeremonyOrchestrator<V> {
    pub fn new(verifier: V, storage: Arc<Storage>) -> Self {
        Self { verifier, storage }
    }

    /// Create the user if needed, issue a creation challenge and persist it.
    pub async fn begin_registration(
        &self,
        username: &str,
        display_name: &str,
    ) -> Result<CeremonyStart<V::CreationOptions>, CeremonyError> {
        validate_username(username)?;
        validate_display_name(display_name)?;

        let credentials = &self.storage.credentials;
        let user = credentials
            .find_or_create_user(username, display_name)
            .await
            .map_err(CeremonyError::from_storage)?;
        let existing = credentials
            .list_credentials(username)
            .await
            .map_err(CeremonyError::from_storage)?
            .unwrap_or_default();

        let (options, state) = self
            .verifier
            .begin_registration(&user, &existing)
            .map_err(|e| CeremonyError::from_verifier(Ceremony::Registration, e))?;

        let session_id = self
            .storage
            .sessions
            .save(username, Ceremony::Registration, &state)
            .await
            .map_err(CeremonyError::from_storage)?;

        tracing::info!(
            username = %username,
            excluded = existing.len(),
            "Passkey registration started"
        );
        Ok(CeremonyStart {
            options,
            session_id,
        })
    }

    /// Consume the session, verify the attestation and store the credential.
    pub async fn finish_registration(
        &self,
        session_id: Option<&str>,
        response: &serde_json::Value,
    ) -> Result<StoredCredential, CeremonyError> {
        let session = self
            .consume_session::<V::RegistrationState>(session_id, Ceremony::Registration)
            .await?;

        let user = self
            .storage
            .credentials
            .get_user_by_username(&session.username)
            .await
            .map_err(CeremonyError::from_storage)?
            .ok_or_else(|| CeremonyError::UserNotFound(session.username.clone()))?;

        let verified = self
            .verifier
            .finish_registration(&user, &session.challenge, response)
            .map_err(|e| CeremonyError::from_verifier(Ceremony::Registration, e))?;

        let stored = self
            .upsert(Ceremony::Registration, &verified, &user)
            .await?;

        tracing::info!(
            username = %user.username,
            credential_id = %stored.credential_id_b64(),
            attestation = stored.credential.attestation_type.as_str(),
            "Passkey registered"
        );
        Ok(stored)
    }

    /// Issue an assertion challenge listing the user's credentials.
    pub async fn begin_login(
        &self,
        username: &str,
    ) -> Result<CeremonyStart<V::RequestOptions>, CeremonyError> {
        validate_username(username)?;

        let account = self
            .storage
            .credentials
            .get_user_with_credentials(username)
            .await
            .map_err(CeremonyError::from_storage)?
            .filter(|account| !account.credentials.is_empty())
            .ok_or_else(|| CeremonyError::UserNotFound(username.to_string()))?;

        let (options, state) = self
            .verifier
            .begin_login(&account.user, &account.credentials)
            .map_err(|e| CeremonyError::from_verifier(Ceremony::Authentication, e))?;

        let session_id = self
            .storage
            .sessions
            .save(username, Ceremony::Authentication, &state)
            .await
            .map_err(CeremonyError::from_storage)?;

        tracing::info!(
            username = %username,
            credentials = account.credentials.len(),
            "Passkey authentication started"
        );
        Ok(CeremonyStart {
            options,
            session_id,
        })
    }

    /// Consume the session, verify the assertion and record the new counter.
    pub async fn finish_login(
        &self,
        session_id: Option<&str>,
        response: &serde_json::Value,
    ) -> Result<LoginOutcome, CeremonyError> {
        let session = self
            .consume_session::<V::AuthenticationState>(session_id, Ceremony::Authentication)
            .await?;

        let account = self
            .storage
            .credentials
            .get_user_with_credentials(&session.username)
            .await
            .map_err(CeremonyError::from_storage)?
            .ok_or_else(|| CeremonyError::UserNotFound(session.username.clone()))?;

        let verified = match self.verifier.finish_login(
            &account.user,
            &account.credentials,
            &session.challenge,
            response,
        ) {
            Ok(verified) => verified,
            Err(VerifierError::PossibleClone { credential_id }) => {
                let marked = self
                    .storage
                    .credentials
                    .mark_clone_warning(&credential_id)
                    .await
                    .map_err(CeremonyError::from_storage)?;
                tracing::warn!(
                    username = %account.user.username,
                    credential_id = %base64_url(&credential_id),
                    marked,
                    "Assertion rejected as possible cloned authenticator"
                );
                return Err(CeremonyError::VerificationFailed {
                    ceremony: Ceremony::Authentication,
                    reason: "possible cloned authenticator".to_string(),
                });
            }
            Err(e) => return Err(CeremonyError::from_verifier(Ceremony::Authentication, e)),
        };

        let credential = self
            .upsert(Ceremony::Authentication, &verified, &account.user)
            .await?;

        if verified.clone_warning {
            tracing::warn!(
                username = %account.user.username,
                credential_id = %credential.credential_id_b64(),
                sign_count = verified.sign_count,
                "Sign counter did not advance, possible cloned authenticator"
            );
        } else {
            tracing::info!(
                username = %account.user.username,
                credential_id = %credential.credential_id_b64(),
                "Passkey authentication succeeded"
            );
        }

        Ok(LoginOutcome {
            user: account.user,
            credential,
            clone_warning: verified.clone_warning,
        })
    }

    /// Load the session and delete it before anything else can use it.
    ///
    /// Only the caller whose delete actually removed the row proceeds; a
    /// concurrent Finish with the same ID sees `SessionNotFound`.
    async fn consume_session<T: DeserializeOwned>(
        &self,
        session_id: Option<&str>,
        ceremony: Ceremony,
    ) -> Result<CeremonySession<T>, CeremonyError> {
        let session_id = session_id
            .filter(|id| !id.is_empty())
            .ok_or(CeremonyError::MissingSessionCookie(ceremony))?;
        let sessions = &self.storage.sessions;

        let session = match sessions.load_and_validate::<T>(session_id, ceremony).await {
            Ok(session) => session,
            Err(StorageError::SessionNotFound) => {
                return Err(CeremonyError::SessionNotFound(ceremony))
            }
            Err(StorageError::SessionCorrupt(reason)) => {
                if let Err(e) = sessions.remove(session_id).await {
                    tracing::error!(error = %e, "Failed to remove corrupt session");
                }
                return Err(CeremonyError::SessionCorrupt { ceremony, reason });
            }
            Err(e) => return Err(CeremonyError::from_storage(e)),
        };

        if !sessions
            .remove(session_id)
            .await
            .map_err(CeremonyError::from_storage)?
        {
            tracing::debug!(ceremony = %ceremony, "Session consumed by a concurrent request");
            return Err(CeremonyError::SessionNotFound(ceremony));
        }

        Ok(session)
    }

    async fn upsert(
        &self,
        ceremony: Ceremony,
        verified: &VerifiedCredential,
        user: &User,
    ) -> Result<StoredCredential, CeremonyError> {
        self.storage
            .credentials
            .upsert_credential(verified, user)
            .await
            .map_err(|e| match e {
                StorageError::CredentialOwnerMismatch => CeremonyError::VerificationFailed {
                    ceremony,
                    reason: "credential is registered to another user".to_string(),
                },
                other => CeremonyError::from_storage(other),
            })
    }
}

fn base64_url(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_depend_on_ceremony() {
        let reg = CeremonyError::SessionNotFound(Ceremony::Registration);
        let auth = CeremonyError::SessionNotFound(Ceremony::Authentication);
        assert_eq!(reg.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(auth.status_code(), StatusCode::UNAUTHORIZED);

        let failed = CeremonyError::VerificationFailed {
            ceremony: Ceremony::Authentication,
            reason: "bad signature".to_string(),
        };
        assert_eq!(failed.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(failed.code(), "VERIFICATION_FAILED");
        assert_eq!(failed.kind(), "VerificationFailed");
        assert!(!failed.client_message().contains("signature"));
    }

    #[test]
    fn test_fixed_status_codes() {
        assert_eq!(
            CeremonyError::InvalidInput("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CeremonyError::MissingSessionCookie(Ceremony::Authentication).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CeremonyError::UserNotFound("bob".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        let storage = CeremonyError::StorageFailure("pool timed out".into());
        assert_eq!(storage.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(storage.client_message(), "Internal server error");
    }

    #[test]
    fn test_verifier_error_mapping() {
        let malformed = CeremonyError::from_verifier(
            Ceremony::Registration,
            VerifierError::MalformedResponse("missing rawId".into()),
        );
        assert!(matches!(malformed, CeremonyError::InvalidInput(_)));

        let challenge = CeremonyError::from_verifier(
            Ceremony::Authentication,
            VerifierError::Challenge("rng".into()),
        );
        assert!(matches!(challenge, CeremonyError::StorageFailure(_)));

        let unknown = CeremonyError::from_verifier(
            Ceremony::Authentication,
            VerifierError::UnknownCredential,
        );
        assert!(matches!(
            unknown,
            CeremonyError::VerificationFailed {
                ceremony: Ceremony::Authentication,
                ..
            }
        ));
    }
}
