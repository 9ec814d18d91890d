//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;

use crate::config::Config;
use crate::webauthn::{CeremonyOrchestrator, PasskeyVerifier, SessionCookies, Storage};

/// Application state containing shared resources.
pub struct AppState<V> {
    /// Ceremony orchestrator wrapping the verifier and stores
    pub orchestrator: CeremonyOrchestrator<V>,
    /// Storage shared with the orchestrator, for read-only endpoints
    pub storage: Arc<Storage>,
    /// Session cookie policy
    pub cookies: SessionCookies,
}

impl<V: PasskeyVerifier> AppState<V> {
    pub fn new(verifier: V, storage: Arc<Storage>, config: &Config) -> Self {
        Self {
            orchestrator: CeremonyOrchestrator::new(verifier, Arc::clone(&storage)),
            storage,
            cookies: SessionCookies::new(config.production, config.session_ttl_secs),
        }
    }
}
