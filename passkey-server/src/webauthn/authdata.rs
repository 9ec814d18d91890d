//! Authenticator data and attestation object parsing
//!
//! Extracts the audit fields kept alongside each credential: flag bits, sign
//! counter, AAGUID, COSE key and algorithm. Signatures are checked by
//! webauthn-rs before any of this is read.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use ciborium::Value;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::types::{Attachment, AttestationType, CredentialFlags, Transport};

pub const FLAG_USER_PRESENT: u8 = 0x01;
pub const FLAG_USER_VERIFIED: u8 = 0x04;
pub const FLAG_BACKUP_ELIGIBLE: u8 = 0x08;
pub const FLAG_BACKUP_STATE: u8 = 0x10;
pub const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 0x40;

/// rpIdHash (32) + flags (1) + signCount (4)
const HEADER_LEN: usize = 37;
const AAGUID_LEN: usize = 16;

/// COSE key map label for the algorithm
const COSE_KEY_ALG: i128 = 3;

/// base64url that accepts both padded and unpadded input
const BASE64_URL_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthDataError {
    #[error("authenticator data truncated: needed {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("invalid CBOR: {0}")]
    Cbor(String),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid base64url in `{0}`")]
    Encoding(&'static str),
}

/// Credential data present when the AT flag is set (registration only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredential {
    pub aaguid: Vec<u8>,
    pub credential_id: Vec<u8>,
    /// COSE_Key bytes exactly as emitted by the authenticator
    pub public_key: Vec<u8>,
    pub algorithm: i64,
}

/// Parsed `authenticatorData`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub flags: u8,
    pub sign_count: u32,
    pub attested: Option<AttestedCredential>,
}

impl AuthenticatorData {
    pub fn parse(bytes: &[u8]) -> Result<Self, AuthDataError> {
        ensure_len(bytes, HEADER_LEN)?;

        let flags = bytes[32];
        let sign_count = u32::from_be_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);

        let attested = if flags & FLAG_ATTESTED_CREDENTIAL_DATA != 0 {
            Some(parse_attested_credential(&bytes[HEADER_LEN..])?)
        } else {
            None
        };

        Ok(Self {
            flags,
            sign_count,
            attested,
        })
    }

    pub fn credential_flags(&self) -> CredentialFlags {
        CredentialFlags {
            user_present: self.flags & FLAG_USER_PRESENT != 0,
            user_verified: self.flags & FLAG_USER_VERIFIED != 0,
            backup_eligible: self.flags & FLAG_BACKUP_ELIGIBLE != 0,
            backup_state: self.flags & FLAG_BACKUP_STATE != 0,
        }
    }
}

fn ensure_len(bytes: &[u8], needed: usize) -> Result<(), AuthDataError> {
    if bytes.len() < needed {
        return Err(AuthDataError::Truncated {
            needed,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn parse_attested_credential(bytes: &[u8]) -> Result<AttestedCredential, AuthDataError> {
    ensure_len(bytes, AAGUID_LEN + 2)?;
    let aaguid = bytes[..AAGUID_LEN].to_vec();
    let id_len = u16::from_be_bytes([bytes[AAGUID_LEN], bytes[AAGUID_LEN + 1]]) as usize;

    let id_start = AAGUID_LEN + 2;
    let key_start = id_start + id_len;
    ensure_len(bytes, key_start)?;
    let credential_id = bytes[id_start..key_start].to_vec();

    // The COSE key is followed by optional extension data, so measure how
    // much of the buffer the decoder consumed.
    let mut remaining = &bytes[key_start..];
    let available = remaining.len();
    let key: Value =
        ciborium::from_reader(&mut remaining).map_err(|e| AuthDataError::Cbor(e.to_string()))?;
    let consumed = available - remaining.len();
    let public_key = bytes[key_start..key_start + consumed].to_vec();

    Ok(AttestedCredential {
        aaguid,
        credential_id,
        public_key,
        algorithm: cose_algorithm(&key)?,
    })
}

fn cose_algorithm(key: &Value) -> Result<i64, AuthDataError> {
    let Value::Map(entries) = key else {
        return Err(AuthDataError::Cbor("COSE key is not a map".to_string()));
    };

    entries
        .iter()
        .find_map(|(label, value)| match (label, value) {
            (Value::Integer(label), Value::Integer(alg)) if i128::from(*label) == COSE_KEY_ALG => {
                i64::try_from(i128::from(*alg)).ok()
            }
            _ => None,
        })
        .ok_or(AuthDataError::MissingField("alg"))
}

/// Parsed `attestationObject`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationObject {
    pub fmt: String,
    pub auth_data: Vec<u8>,
}

impl AttestationObject {
    pub fn parse(bytes: &[u8]) -> Result<Self, AuthDataError> {
        let value: Value =
            ciborium::from_reader(bytes).map_err(|e| AuthDataError::Cbor(e.to_string()))?;
        let Value::Map(entries) = value else {
            return Err(AuthDataError::Cbor("attestation object is not a map".to_string()));
        };

        let mut fmt = None;
        let mut auth_data = None;
        for (key, value) in entries {
            match (key, value) {
                (Value::Text(key), Value::Text(value)) if key == "fmt" => fmt = Some(value),
                (Value::Text(key), Value::Bytes(value)) if key == "authData" => {
                    auth_data = Some(value)
                }
                _ => {}
            }
        }

        Ok(Self {
            fmt: fmt.ok_or(AuthDataError::MissingField("fmt"))?,
            auth_data: auth_data.ok_or(AuthDataError::MissingField("authData"))?,
        })
    }

    pub fn attestation_type(&self) -> AttestationType {
        AttestationType::from_fmt(&self.fmt)
    }
}

/// Whether an assertion's counter indicates a possibly cloned authenticator.
///
/// Authenticators that do not implement a counter always report zero; once
/// either side is non-zero the counter must strictly increase.
pub fn is_possible_clone(stored: u32, asserted: u32) -> bool {
    (stored != 0 || asserted != 0) && asserted <= stored
}

pub fn client_data_hash(client_data_json: &[u8]) -> Vec<u8> {
    Sha256::digest(client_data_json).to_vec()
}

pub fn decode_b64url(value: &str, field: &'static str) -> Result<Vec<u8>, AuthDataError> {
    BASE64_URL_LENIENT
        .decode(value)
        .map_err(|_| AuthDataError::Encoding(field))
}

/// Client-side fields of a registration response that the audit trail keeps
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationResponseView {
    #[serde(default)]
    pub authenticator_attachment: Option<String>,
    pub response: AttestationResponseBody,
}

#[derive(Debug, Deserialize)]
pub struct AttestationResponseBody {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    #[serde(rename = "attestationObject")]
    pub attestation_object: String,
    #[serde(default)]
    pub transports: Option<Vec<String>>,
}

/// Registration artifacts decoded from the raw client response
#[derive(Debug, Clone)]
pub struct RegistrationArtifacts {
    pub attestation_type: AttestationType,
    pub authenticator: AuthenticatorData,
    pub attested: AttestedCredential,
    pub attachment: Attachment,
    pub transports: Vec<Transport>,
    pub client_data_hash: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub attestation_object: Vec<u8>,
}

impl RegistrationArtifacts {
    pub fn from_response(response: &serde_json::Value) -> Result<Self, AuthDataError> {
        let view = AttestationResponseView::deserialize(response)
            .map_err(|_| AuthDataError::MissingField("response"))?;

        let client_data_json = decode_b64url(&view.response.client_data_json, "clientDataJSON")?;
        let attestation_object =
            decode_b64url(&view.response.attestation_object, "attestationObject")?;

        let parsed = AttestationObject::parse(&attestation_object)?;
        let authenticator = AuthenticatorData::parse(&parsed.auth_data)?;
        let attested = authenticator
            .attested
            .clone()
            .ok_or(AuthDataError::MissingField("attestedCredentialData"))?;

        let transports = view
            .response
            .transports
            .as_deref()
            .map(|hints| Transport::parse_all(hints.iter().map(String::as_str)))
            .unwrap_or_default();

        Ok(Self {
            attestation_type: parsed.attestation_type(),
            authenticator,
            attested,
            attachment: view
                .authenticator_attachment
                .as_deref()
                .map(Attachment::parse)
                .unwrap_or_default(),
            transports,
            client_data_hash: client_data_hash(&client_data_json),
            authenticator_data: parsed.auth_data,
            attestation_object,
        })
    }
}

/// Client-side fields of an authentication response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResponseView {
    pub raw_id: String,
    pub response: AssertionResponseBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResponseBody {
    pub authenticator_data: String,
}

/// Assertion fields needed to update a stored credential
#[derive(Debug, Clone)]
pub struct AssertionArtifacts {
    pub credential_id: Vec<u8>,
    pub authenticator: AuthenticatorData,
}

impl AssertionArtifacts {
    pub fn from_response(response: &serde_json::Value) -> Result<Self, AuthDataError> {
        let view = AssertionResponseView::deserialize(response)
            .map_err(|_| AuthDataError::MissingField("response"))?;

        let credential_id = decode_b64url(&view.raw_id, "rawId")?;
        let authenticator_data =
            decode_b64url(&view.response.authenticator_data, "authenticatorData")?;

        Ok(Self {
            credential_id,
            authenticator: AuthenticatorData::parse(&authenticator_data)?,
        })
    }
}
