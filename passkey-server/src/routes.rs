//! Router configuration module
//!
//! Configures all routes, middleware layers, and creates the application router.

use std::{sync::Arc, time::Duration};

use axum::{
    http::{header, HeaderValue, Method, StatusCode, Uri},
    routing::{get, post},
    Router,
};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::ApiError;
use crate::handlers::{health, list_registered_passkeys, ready};
use crate::state::AppState;
use crate::webauthn::{handlers as ceremony, PasskeyVerifier};

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .rp_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    if origins.is_empty() {
        tracing::warn!("CORS: Allowing all origins (dev mode)");
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    tracing::info!("CORS: Restricting to {} origin(s)", origins.len());
    // Credentials are required for the session cookie to round-trip
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found(format!("No route for {}", uri.path()))
}

/// Create the application router
pub fn create_router<V: PasskeyVerifier>(state: Arc<AppState<V>>, config: &Config) -> Router {
    // Request body limit
    let body_limit = RequestBodyLimitLayer::new(config.body_limit_kb * 1024);

    // Request timeout
    let timeout = TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(config.timeout_secs),
    );

    let router = Router::new()
        .route("/api/register/begin", post(ceremony::begin_registration::<V>))
        .route("/api/register/finish", post(ceremony::finish_registration::<V>))
        .route("/api/authenticate/begin", post(ceremony::begin_login::<V>))
        .route("/api/authenticate/finish", post(ceremony::finish_login::<V>))
        .route(
            "/api/users/{username}/registered-passkeys",
            get(list_registered_passkeys::<V>),
        )
        .route("/health", get(health::<V>))
        .route("/ready", get(ready::<V>))
        .fallback(not_found)
        .with_state(state)
        .layer(cors_layer(config))
        .layer(body_limit)
        .layer(timeout);

    // Conditionally apply rate limiting (disabled in tests, enabled in production)
    let governor_conf = if config.rate_limit_enabled {
        GovernorConfigBuilder::default()
            .per_second(config.rate_limit_per_sec)
            .burst_size(config.rate_limit_burst)
            .finish()
    } else {
        None
    };

    match governor_conf {
        Some(conf) => {
            tracing::info!(
                "Rate limiting: {} req/s (burst: {})",
                config.rate_limit_per_sec,
                config.rate_limit_burst
            );
            router
                .layer(GovernorLayer::new(Arc::new(conf)))
                .layer(TraceLayer::new_for_http())
        }
        None => {
            if config.rate_limit_enabled {
                tracing::error!(
                    per_sec = config.rate_limit_per_sec,
                    burst = config.rate_limit_burst,
                    "Invalid rate limit settings, rate limiting DISABLED"
                );
            } else {
                tracing::warn!("Rate limiting: DISABLED");
            }
            router.layer(TraceLayer::new_for_http())
        }
    }
}
