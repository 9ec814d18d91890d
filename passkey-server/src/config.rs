//! Server configuration module
//!
//! Handles loading configuration from environment variables with sensible defaults.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 3000)
    pub port: u16,
    /// Server host (default: 127.0.0.1)
    pub host: IpAddr,
    /// PostgreSQL URL; in-memory stores are used when unset
    pub database_url: Option<String>,
    /// Database connection pool maximum connections (default: 20)
    pub database_max_connections: u32,
    /// Database connection pool minimum connections (default: 2)
    pub database_min_connections: u32,
    /// Relying Party ID, the registrable domain (default: localhost)
    pub rp_id: String,
    /// Relying Party display name
    pub rp_name: String,
    /// Allowed origins; the first is the primary RP origin. Also the CORS allow-list.
    pub rp_origins: Vec<String>,
    /// Production mode marks cookies `Secure` (ENV=production)
    pub production: bool,
    /// Ceremony session lifetime in seconds (default: 300)
    pub session_ttl_secs: u64,
    /// Interval between expired-session sweeps in seconds (default: 600)
    pub session_reap_interval_secs: u64,
    /// Request body limit in KB (default: 64)
    pub body_limit_kb: usize,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Enable rate limiting (default: false for tests, true when loaded from env)
    pub rate_limit_enabled: bool,
    /// Rate limit: requests per second (default: 10)
    pub rate_limit_per_sec: u64,
    /// Rate limit: burst size (default: 20)
    pub rate_limit_burst: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            database_url: None,
            database_max_connections: 20,
            database_min_connections: 2,
            rp_id: "localhost".to_string(),
            rp_name: "Passkey Server".to_string(),
            rp_origins: vec!["http://localhost:3000".to_string()],
            production: false,
            session_ttl_secs: 300,
            session_reap_interval_secs: 600,
            body_limit_kb: 64,
            timeout_secs: 30,
            rate_limit_enabled: false, // Disabled by default (for tests)
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let rp_origins = std::env::var("RP_ORIGINS")
            .ok()
            .map(|v| split_list(&v))
            .filter(|origins| !origins.is_empty())
            .unwrap_or(defaults.rp_origins);

        let production = std::env::var("ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        // Rate limiting enabled by default outside tests, can be disabled with RATE_LIMIT_ENABLED=false
        let rate_limit_enabled = std::env::var("RATE_LIMIT_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            port: env_parse("PORT").unwrap_or(defaults.port),
            host: env_parse("HOST").unwrap_or(defaults.host),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            database_min_connections: env_parse("DATABASE_MIN_CONNECTIONS")
                .unwrap_or(defaults.database_min_connections),
            rp_id: std::env::var("RP_ID").unwrap_or(defaults.rp_id),
            rp_name: std::env::var("RP_NAME").unwrap_or(defaults.rp_name),
            rp_origins,
            production,
            session_ttl_secs: env_parse("SESSION_TTL_SECS").unwrap_or(defaults.session_ttl_secs),
            session_reap_interval_secs: env_parse("SESSION_REAP_INTERVAL_SECS")
                .unwrap_or(defaults.session_reap_interval_secs),
            body_limit_kb: env_parse("BODY_LIMIT_KB").unwrap_or(defaults.body_limit_kb),
            timeout_secs: env_parse("REQUEST_TIMEOUT_SECS").unwrap_or(defaults.timeout_secs),
            rate_limit_enabled,
            rate_limit_per_sec: env_parse("RATE_LIMIT_PER_SEC")
                .unwrap_or(defaults.rate_limit_per_sec),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST").unwrap_or(defaults.rate_limit_burst),
        }
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
