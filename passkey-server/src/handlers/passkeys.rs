//! Registered passkeys listing
//!
//! Read-only metadata view. Public keys and audit blobs never leave the server.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::ApiError;
use crate::state::AppState;
use crate::validation::validate_username;
use crate::webauthn::{CeremonyError, PasskeySummary, PasskeyVerifier, RegisteredPasskeysResponse};

/// GET /api/users/{username}/registered-passkeys
pub async fn list_registered_passkeys<V: PasskeyVerifier>(
    State(state): State<Arc<AppState<V>>>,
    Path(username): Path<String>,
) -> Result<Json<RegisteredPasskeysResponse>, ApiError> {
    validate_username(&username)?;

    let credentials = state
        .storage
        .credentials
        .list_credentials(&username)
        .await
        .map_err(|e| CeremonyError::StorageFailure(e.to_string()))?
        .ok_or_else(|| CeremonyError::UserNotFound(username.clone()))?;

    Ok(Json(RegisteredPasskeysResponse {
        passkeys: credentials.iter().map(PasskeySummary::from).collect(),
        username,
    }))
}
