//! HTTP request handlers
//!
//! Health probes and read-only endpoints. The ceremony handlers live in
//! `crate::webauthn::handlers`.

pub mod health;
pub mod passkeys;

pub use crate::state::AppState;
pub use health::{health, ready, HealthResponse, ReadyResponse};
pub use passkeys::list_registered_passkeys;
