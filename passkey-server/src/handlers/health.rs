//! Health check handlers
//!
//! Provides health and readiness endpoints for monitoring and orchestration.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;
use crate::webauthn::PasskeyVerifier;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status: "healthy" or "degraded"
    pub status: &'static str,
    /// Server version from Cargo.toml
    pub version: &'static str,
    /// Service name
    pub service: &'static str,
    /// Storage backend: "postgres" or "memory"
    pub storage: &'static str,
    /// Ceremony sessions awaiting Finish (None when storage is unreachable)
    pub pending_sessions: Option<usize>,
}

/// GET /health - Health check endpoint
///
/// Returns JSON with service status, version, storage backend and the
/// number of pending ceremony sessions.
pub async fn health<V: PasskeyVerifier>(
    State(state): State<Arc<AppState<V>>>,
) -> Json<HealthResponse> {
    let storage_ok = state.storage.check_health().await.is_ok();
    let pending_sessions = match state.storage.sessions.count().await {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to count pending sessions");
            None
        }
    };

    let status = if storage_ok && pending_sessions.is_some() {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        service: "passkey-server",
        storage: if state.storage.is_persistent() {
            "postgres"
        } else {
            "memory"
        },
        pending_sessions,
    })
}

/// Readiness response for Kubernetes
#[derive(Serialize)]
pub struct ReadyResponse {
    /// Whether the service is ready to accept traffic
    pub ready: bool,
    /// Optional message explaining status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

/// GET /ready - Kubernetes readiness probe
///
/// Returns 200 when storage is reachable, 503 otherwise.
pub async fn ready<V: PasskeyVerifier>(
    State(state): State<Arc<AppState<V>>>,
) -> (StatusCode, Json<ReadyResponse>) {
    match state.storage.check_health().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                message: None,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    ready: false,
                    message: Some("Storage unavailable"),
                }),
            )
        }
    }
}
