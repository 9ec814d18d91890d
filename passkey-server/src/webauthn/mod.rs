//! WebAuthn/passkey ceremony module
//!
//! ## Architecture
//!
//! - `config`: WebAuthn Relying Party configuration
//! - `cookie`: the `sid` session cookie
//! - `storage`: ceremony sessions, users and credentials (PostgreSQL or memory)
//! - `verifier`: the `PasskeyVerifier` seam and its webauthn-rs implementation
//! - `authdata`: authenticator data and attestation object parsing
//! - `ceremony`: the begin/finish state machine
//! - `handlers`: HTTP endpoint handlers for registration/authentication
//! - `types`: domain types and request/response shapes

mod authdata;
mod ceremony;
mod config;
mod cookie;
pub mod handlers;
pub mod storage;
mod types;
mod verifier;

pub use authdata::{is_possible_clone, AuthDataError, AuthenticatorData};
pub use ceremony::{CeremonyError, CeremonyOrchestrator, CeremonyStart, LoginOutcome};
pub use config::{ConfigError, WebAuthnConfig};
pub use cookie::{SessionCookies, SESSION_COOKIE};
pub use storage::{CeremonySession, CredentialStore, SessionStore, Storage, StorageError};
pub use types::{
    Attachment, AttestationType, BeginLoginRequest, BeginRegistrationRequest, Ceremony,
    CeremonyStatus, CredentialFlags, PasskeySummary, RegisteredPasskeysResponse, StoredCredential,
    Transport, User, UserWithCredentials, VerifiedCredential,
};
pub use verifier::{PasskeyVerifier, VerifierError, WebauthnVerifier};
