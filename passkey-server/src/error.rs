//! API error handling module
//!
//! Provides a unified error type for all API endpoints with structured error variants.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::webauthn::CeremonyError;

/// API error type with structured variants for different error categories
#[derive(Debug, Error)]
pub enum ApiError {
    /// Not found - requested route does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Ceremony error - failure in a registration or authentication step
    #[error(transparent)]
    Ceremony(#[from] CeremonyError),
}

impl ApiError {
    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Ceremony(e) => e.status_code(),
        }
    }

    /// Get the error code for programmatic error handling
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Ceremony(e) => e.code(),
        }
    }

    /// Get the taxonomy name reported as `kind`
    fn error_kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::Ceremony(e) => e.kind(),
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            // Storage and verifier details stay in the logs
            Self::Ceremony(e) => e.client_message(),
            Self::NotFound(_) => self.to_string(),
        }
    }

    /// Get the error category for logging
    fn error_category(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Ceremony(CeremonyError::StorageFailure(_)) => "storage",
            Self::Ceremony(CeremonyError::VerificationFailed { .. }) => "verification",
            Self::Ceremony(CeremonyError::MissingSessionCookie(_))
            | Self::Ceremony(CeremonyError::SessionNotFound(_))
            | Self::Ceremony(CeremonyError::SessionCorrupt { .. }) => "session",
            Self::Ceremony(_) => "bad_request",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let code = self.error_code();
        let kind = self.error_kind();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        // Log based on severity, always including internal details
        if status.is_server_error() {
            tracing::error!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Server error"
            );
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Authentication error"
            );
        } else {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Client error"
            );
        }

        // All error responses include `code` and `kind` for programmatic error handling
        let body = serde_json::json!({
            "error": client_message,
            "code": code,
            "kind": kind,
        });

        (status, Json(body)).into_response()
    }
}
