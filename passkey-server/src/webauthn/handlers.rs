//! WebAuthn HTTP endpoint handlers
//!
//! Implements the registration and authentication flows. Begin handlers set
//! the `sid` cookie scoped to the ceremony path; Finish handlers clear it
//! whether or not verification succeeds.

use std::sync::Arc;

use axum::{body::Bytes, extract::State, Json};
use axum_extra::extract::cookie::CookieJar;

use super::types::{BeginLoginRequest, BeginRegistrationRequest, Ceremony, CeremonyStatus};
use super::verifier::PasskeyVerifier;
use crate::error::ApiError;
use crate::state::AppState;
use crate::validation::parse_json_body;

/// POST /api/register/begin
///
/// Start passkey registration. Creates the user on first sight and returns
/// the credential creation options for `navigator.credentials.create()`.
pub async fn begin_registration<V: PasskeyVerifier>(
    State(state): State<Arc<AppState<V>>>,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<V::CreationOptions>), ApiError> {
    let req: BeginRegistrationRequest = parse_json_body(&body)?;
    let display_name = req
        .display_name
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(&req.username);

    let start = state
        .orchestrator
        .begin_registration(&req.username, display_name)
        .await?;

    let jar = state
        .cookies
        .set(jar, &start.session_id, Ceremony::Registration.scope_path());
    Ok((jar, Json(start.options)))
}

/// POST /api/register/finish
///
/// Complete registration with the browser's attestation response.
pub async fn finish_registration<V: PasskeyVerifier>(
    State(state): State<Arc<AppState<V>>>,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<CeremonyStatus>), (CookieJar, ApiError)> {
    // A body that is not JSON at all leaves the session untouched
    let response: serde_json::Value = match parse_json_body(&body) {
        Ok(response) => response,
        Err(e) => return Err((jar, e.into())),
    };

    let session_id = state.cookies.read(&jar);
    let jar = state
        .cookies
        .clear(jar, Ceremony::Registration.scope_path());

    match state
        .orchestrator
        .finish_registration(session_id.as_deref(), &response)
        .await
    {
        Ok(_) => Ok((jar, Json(CeremonyStatus::registered()))),
        Err(e) => Err((jar, e.into())),
    }
}

/// POST /api/authenticate/begin
///
/// Start passkey authentication for a user with at least one passkey.
pub async fn begin_login<V: PasskeyVerifier>(
    State(state): State<Arc<AppState<V>>>,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<V::RequestOptions>), ApiError> {
    let req: BeginLoginRequest = parse_json_body(&body)?;

    let start = state.orchestrator.begin_login(&req.username).await?;

    let jar = state
        .cookies
        .set(jar, &start.session_id, Ceremony::Authentication.scope_path());
    Ok((jar, Json(start.options)))
}

/// POST /api/authenticate/finish
///
/// Complete authentication with the browser's assertion response.
pub async fn finish_login<V: PasskeyVerifier>(
    State(state): State<Arc<AppState<V>>>,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<CeremonyStatus>), (CookieJar, ApiError)> {
    let response: serde_json::Value = match parse_json_body(&body) {
        Ok(response) => response,
        Err(e) => return Err((jar, e.into())),
    };

    let session_id = state.cookies.read(&jar);
    let jar = state
        .cookies
        .clear(jar, Ceremony::Authentication.scope_path());

    match state
        .orchestrator
        .finish_login(session_id.as_deref(), &response)
        .await
    {
        Ok(outcome) => Ok((jar, Json(CeremonyStatus::authenticated(outcome.clone_warning)))),
        Err(e) => Err((jar, e.into())),
    }
}
