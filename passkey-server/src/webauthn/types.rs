//! Passkey domain types and request/response shapes
//!
//! `VerifiedCredential` is what a ceremony produces; `StoredCredential` is the
//! durable row built from it. The mapping between the two lives here so the
//! rules for which fields change on re-authentication are in one place.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The two ceremonies a session can belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ceremony {
    Registration,
    Authentication,
}

impl Ceremony {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Authentication => "authentication",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "registration" => Some(Self::Registration),
            "authentication" => Some(Self::Authentication),
            _ => None,
        }
    }

    /// Cookie path that contains the session for this ceremony
    pub fn scope_path(&self) -> &'static str {
        match self {
            Self::Registration => "/api/register",
            Self::Authentication => "/api/authenticate",
        }
    }
}

impl std::fmt::Display for Ceremony {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relying-party account. `id` doubles as the WebAuthn user handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            display_name: display_name.into(),
            created_at: Utc::now(),
        }
    }
}

/// A user together with every credential registered to them
#[derive(Debug, Clone)]
pub struct UserWithCredentials {
    pub user: User,
    pub credentials: Vec<StoredCredential>,
}

/// Authenticator transport hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    Usb,
    Nfc,
    Ble,
    Internal,
    Hybrid,
    SmartCard,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usb => "usb",
            Self::Nfc => "nfc",
            Self::Ble => "ble",
            Self::Internal => "internal",
            Self::Hybrid => "hybrid",
            Self::SmartCard => "smart-card",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "usb" => Some(Self::Usb),
            "nfc" => Some(Self::Nfc),
            "ble" => Some(Self::Ble),
            "internal" => Some(Self::Internal),
            "hybrid" => Some(Self::Hybrid),
            "smart-card" => Some(Self::SmartCard),
            _ => None,
        }
    }

    /// Parse a list of hints, dropping values this server does not know
    pub fn parse_all<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<Self> {
        let mut transports: Vec<Self> = Vec::new();
        for transport in values.into_iter().filter_map(Self::parse) {
            if !transports.contains(&transport) {
                transports.push(transport);
            }
        }
        transports
    }
}

/// WebAuthn attestation statement format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttestationType {
    /// No attestation (the passkey default)
    #[default]
    None,
    Packed,
    Tpm,
    AndroidKey,
    AndroidSafetynet,
    Apple,
    FidoU2f,
    Unknown,
}

impl AttestationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Packed => "packed",
            Self::Tpm => "tpm",
            Self::AndroidKey => "android-key",
            Self::AndroidSafetynet => "android-safetynet",
            Self::Apple => "apple",
            Self::FidoU2f => "fido-u2f",
            Self::Unknown => "unknown",
        }
    }

    /// Map the `fmt` value of an attestation object
    pub fn from_fmt(fmt: &str) -> Self {
        match fmt {
            "none" => Self::None,
            "packed" => Self::Packed,
            "tpm" => Self::Tpm,
            "android-key" => Self::AndroidKey,
            "android-safetynet" => Self::AndroidSafetynet,
            "apple" => Self::Apple,
            "fido-u2f" => Self::FidoU2f,
            _ => Self::Unknown,
        }
    }
}

/// Authenticator attachment class reported by the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Attachment {
    /// Built into the device (Touch ID, Windows Hello, Android)
    Platform,
    /// Roaming authenticator (security key, phone via hybrid)
    CrossPlatform,
    #[default]
    Unknown,
}

impl Attachment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::CrossPlatform => "cross-platform",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "platform" => Self::Platform,
            "cross-platform" => Self::CrossPlatform,
            _ => Self::Unknown,
        }
    }
}

/// Flag bits from the authenticator data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialFlags {
    pub user_present: bool,
    pub user_verified: bool,
    pub backup_eligible: bool,
    pub backup_state: bool,
}

/// Credential as returned by a successful ceremony
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedCredential {
    pub credential_id: Vec<u8>,
    pub public_key: Vec<u8>,
    pub public_key_algorithm: i64,
    pub attestation_type: AttestationType,
    pub transports: Vec<Transport>,
    pub flags: CredentialFlags,
    pub aaguid: Vec<u8>,
    pub sign_count: u32,
    pub clone_warning: bool,
    pub attachment: Attachment,
    pub client_data_hash: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub attestation_object: Vec<u8>,
    /// The verifier's own serialized credential, needed to rebuild allow-lists
    pub passkey: serde_json::Value,
}

/// Durable credential row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCredential {
    pub id: Uuid,
    pub user_id: Uuid,
    pub credential: VerifiedCredential,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl StoredCredential {
    /// Build a fresh row for a credential seen for the first time
    pub fn from_verified(user_id: Uuid, credential: VerifiedCredential, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            credential,
            created_at: now,
            last_used_at: now,
        }
    }

    /// Apply a later ceremony result for the same credential ID.
    ///
    /// Row identity and ownership never change. Key material and the
    /// registration artifacts always travel with the `passkey` blob, so the
    /// audit columns describe the key webauthn-rs verifies against. The
    /// clone warning is sticky and transports are only replaced by a
    /// non-empty list.
    pub fn merge(&mut self, update: &VerifiedCredential, now: DateTime<Utc>) {
        let current = &mut self.credential;
        current.public_key = update.public_key.clone();
        current.public_key_algorithm = update.public_key_algorithm;
        current.attestation_type = update.attestation_type;
        current.aaguid = update.aaguid.clone();
        current.attachment = update.attachment;
        current.client_data_hash = update.client_data_hash.clone();
        current.authenticator_data = update.authenticator_data.clone();
        current.attestation_object = update.attestation_object.clone();
        current.sign_count = update.sign_count;
        current.clone_warning |= update.clone_warning;
        current.flags = update.flags;
        if !update.transports.is_empty() {
            current.transports = update.transports.clone();
        }
        current.passkey = update.passkey.clone();
        self.last_used_at = now;
    }

    pub fn credential_id_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.credential.credential_id)
    }
}

/// Request body for `POST /api/register/begin`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginRegistrationRequest {
    pub username: String,
    /// Falls back to the username when omitted
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Request body for `POST /api/authenticate/begin`
#[derive(Debug, Deserialize)]
pub struct BeginLoginRequest {
    pub username: String,
}

/// Body returned by both finish endpoints
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CeremonyStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub clone_warning: bool,
}

impl CeremonyStatus {
    pub fn registered() -> Self {
        Self {
            status: "registered",
            clone_warning: false,
        }
    }

    pub fn authenticated(clone_warning: bool) -> Self {
        Self {
            status: "authenticated",
            clone_warning,
        }
    }
}

/// Metadata view of a registered passkey. Never carries key material.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasskeySummary {
    pub credential_id: String,
    pub attestation_type: AttestationType,
    pub transports: Vec<Transport>,
    pub flags: CredentialFlags,
    pub aaguid: String,
    pub sign_count: u32,
    pub clone_warning: bool,
    pub attachment: Attachment,
    pub public_key_algorithm: i64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl From<&StoredCredential> for PasskeySummary {
    fn from(stored: &StoredCredential) -> Self {
        let credential = &stored.credential;
        let aaguid = Uuid::from_slice(&credential.aaguid)
            .map(|id| id.to_string())
            .unwrap_or_default();

        Self {
            credential_id: stored.credential_id_b64(),
            attestation_type: credential.attestation_type,
            transports: credential.transports.clone(),
            flags: credential.flags,
            aaguid,
            sign_count: credential.sign_count,
            clone_warning: credential.clone_warning,
            attachment: credential.attachment,
            public_key_algorithm: credential.public_key_algorithm,
            created_at: stored.created_at,
            last_used_at: stored.last_used_at,
        }
    }
}

/// Response for `GET /api/users/{username}/registered-passkeys`
#[derive(Debug, Serialize)]
pub struct RegisteredPasskeysResponse {
    pub username: String,
    pub passkeys: Vec<PasskeySummary>,
}
