//! WebAuthn Relying Party configuration
//!
//! Configures the WebAuthn library with Relying Party (RP) identity. Built once
//! at startup and shared read-only by the verifier.

use url::Url;
use webauthn_rs::prelude::*;

use crate::config::Config;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid origin URL: {0}")]
    InvalidOrigin(String),
    #[error("At least one relying party origin is required")]
    NoOrigins,
    #[error("WebAuthn error: {0:?}")]
    Webauthn(WebauthnError),
}

/// WebAuthn configuration wrapper
pub struct WebAuthnConfig {
    webauthn: Webauthn,
}

impl WebAuthnConfig {
    /// Create a new WebAuthn configuration
    ///
    /// # Arguments
    ///
    /// * `rp_id` - Relying Party ID (typically the domain name)
    /// * `origins` - Allowed origins, the first being the primary RP origin
    /// * `rp_name` - Human-readable name for the Relying Party
    pub fn new(rp_id: &str, origins: &[Url], rp_name: &str) -> Result<Self, ConfigError> {
        let (primary, extra) = origins.split_first().ok_or(ConfigError::NoOrigins)?;

        let mut builder = WebauthnBuilder::new(rp_id, primary)
            .map_err(ConfigError::Webauthn)?
            .rp_name(rp_name)
            .allow_subdomains(false);
        for origin in extra {
            builder = builder.append_allowed_origin(origin);
        }

        Ok(Self {
            webauthn: builder.build().map_err(ConfigError::Webauthn)?,
        })
    }

    /// Create configuration from the server config (`RP_ID`, `RP_ORIGINS`, `RP_NAME`)
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let origins = config
            .rp_origins
            .iter()
            .map(|o| Url::parse(o).map_err(|e| ConfigError::InvalidOrigin(format!("{}: {}", o, e))))
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(&config.rp_id, &origins, &config.rp_name)
    }

    /// Get a reference to the Webauthn instance
    pub fn webauthn(&self) -> &Webauthn {
        &self.webauthn
    }
}

impl std::fmt::Debug for WebAuthnConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebAuthnConfig")
            .field("webauthn", &"<Webauthn instance>")
            .finish()
    }
}
