//! Passkey Server - WebAuthn registration and authentication ceremonies
//!
//! Endpoints:
//! - POST /api/register/begin, /api/register/finish
//! - POST /api/authenticate/begin, /api/authenticate/finish
//! - GET  /api/users/{username}/registered-passkeys
//! - GET  /health, /ready

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use passkey_server::{
    create_router,
    state::AppState,
    webauthn::{Storage, WebAuthnConfig, WebauthnVerifier},
    Config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,passkey_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let mode = if config.production {
        "PRODUCTION"
    } else {
        "DEVELOPMENT"
    };
    tracing::info!(
        rp_id = %config.rp_id,
        origins = ?config.rp_origins,
        mode,
        session_ttl_secs = config.session_ttl_secs,
        "Starting passkey-server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let webauthn =
        WebAuthnConfig::from_config(&config).context("Invalid relying party configuration")?;
    let storage = Arc::new(
        Storage::from_config(&config)
            .await
            .context("Failed to initialise storage")?,
    );

    spawn_session_reaper(
        Arc::clone(&storage),
        Duration::from_secs(config.session_reap_interval_secs.max(1)),
    );

    let state = Arc::new(AppState::new(
        WebauthnVerifier::new(webauthn),
        storage,
        &config,
    ));
    let app = create_router(state, &config);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Periodically delete ceremony sessions that outlived their TTL
fn spawn_session_reaper(storage: Arc<Storage>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            match storage.sessions.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "Purged expired ceremony sessions"),
                Err(e) => tracing::warn!(error = %e, "Session purge failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
