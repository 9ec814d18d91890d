//! Cryptographic verification seam
//!
//! The ceremony orchestrator only talks to [`PasskeyVerifier`]. The production
//! implementation delegates challenge generation and signature checks to
//! webauthn-rs and fills in the audit fields from the raw client response.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use webauthn_rs::prelude::{
    CreationChallengeResponse, CredentialID, Passkey, PasskeyAuthentication, PasskeyRegistration,
    PublicKeyCredential, RegisterPublicKeyCredential, RequestChallengeResponse, WebauthnError,
};

use super::authdata::{is_possible_clone, AssertionArtifacts, RegistrationArtifacts};
use super::config::WebAuthnConfig;
use super::types::{StoredCredential, User, VerifiedCredential};

#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error("malformed client response: {0}")]
    MalformedResponse(String),

    #[error("challenge generation failed: {0}")]
    Challenge(String),

    #[error("verification rejected: {0}")]
    Rejected(String),

    /// The assertion counter did not advance past the stored value
    #[error("possible cloned authenticator")]
    PossibleClone { credential_id: Vec<u8> },

    #[error("credential is not registered to this user")]
    UnknownCredential,

    #[error("stored credential could not be decoded: {0}")]
    CorruptCredential(String),
}

/// Challenge issuance and response verification for both ceremonies.
///
/// The state types are persisted in the session store between begin and
/// finish, so they must round-trip through JSON.
pub trait PasskeyVerifier: Send + Sync + 'static {
    type RegistrationState: Serialize + DeserializeOwned + Send + Sync;
    type AuthenticationState: Serialize + DeserializeOwned + Send + Sync;
    type CreationOptions: Serialize + Send;
    type RequestOptions: Serialize + Send;

    fn begin_registration(
        &self,
        user: &User,
        existing: &[StoredCredential],
    ) -> Result<(Self::CreationOptions, Self::RegistrationState), VerifierError>;

    fn finish_registration(
        &self,
        user: &User,
        state: &Self::RegistrationState,
        response: &serde_json::Value,
    ) -> Result<VerifiedCredential, VerifierError>;

    fn begin_login(
        &self,
        user: &User,
        credentials: &[StoredCredential],
    ) -> Result<(Self::RequestOptions, Self::AuthenticationState), VerifierError>;

    fn finish_login(
        &self,
        user: &User,
        credentials: &[StoredCredential],
        state: &Self::AuthenticationState,
        response: &serde_json::Value,
    ) -> Result<VerifiedCredential, VerifierError>;
}

/// webauthn-rs backed verifier
#[derive(Debug, Clone)]
pub struct WebauthnVerifier {
    config: Arc<WebAuthnConfig>,
}

impl WebauthnVerifier {
    pub fn new(config: WebAuthnConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

fn decode_passkey(stored: &StoredCredential) -> Result<Passkey, VerifierError> {
    serde_json::from_value(stored.credential.passkey.clone())
        .map_err(|e| VerifierError::CorruptCredential(e.to_string()))
}

fn encode_passkey(passkey: &Passkey) -> Result<serde_json::Value, VerifierError> {
    serde_json::to_value(passkey).map_err(|e| VerifierError::CorruptCredential(e.to_string()))
}

impl PasskeyVerifier for WebauthnVerifier {
    type RegistrationState = PasskeyRegistration;
    type AuthenticationState = PasskeyAuthentication;
    type CreationOptions = CreationChallengeResponse;
    type RequestOptions = RequestChallengeResponse;

    fn begin_registration(
        &self,
        user: &User,
        existing: &[StoredCredential],
    ) -> Result<(CreationChallengeResponse, PasskeyRegistration), VerifierError> {
        let exclude: Vec<CredentialID> = existing
            .iter()
            .map(|c| CredentialID::from(c.credential.credential_id.clone()))
            .collect();
        let exclude = (!exclude.is_empty()).then_some(exclude);

        self.config
            .webauthn()
            .start_passkey_registration(user.id, &user.username, &user.display_name, exclude)
            .map_err(|e| VerifierError::Challenge(format!("{:?}", e)))
    }

    fn finish_registration(
        &self,
        _user: &User,
        state: &PasskeyRegistration,
        response: &serde_json::Value,
    ) -> Result<VerifiedCredential, VerifierError> {
        let artifacts = RegistrationArtifacts::from_response(response)
            .map_err(|e| VerifierError::MalformedResponse(e.to_string()))?;
        let credential: RegisterPublicKeyCredential = serde_json::from_value(response.clone())
            .map_err(|e| VerifierError::MalformedResponse(e.to_string()))?;

        let passkey = self
            .config
            .webauthn()
            .finish_passkey_registration(&credential, state)
            .map_err(|e| VerifierError::Rejected(format!("{:?}", e)))?;

        let attested = artifacts.attested;
        Ok(VerifiedCredential {
            credential_id: attested.credential_id,
            public_key: attested.public_key,
            public_key_algorithm: attested.algorithm,
            attestation_type: artifacts.attestation_type,
            transports: artifacts.transports,
            flags: artifacts.authenticator.credential_flags(),
            aaguid: attested.aaguid,
            sign_count: artifacts.authenticator.sign_count,
            clone_warning: false,
            attachment: artifacts.attachment,
            client_data_hash: artifacts.client_data_hash,
            authenticator_data: artifacts.authenticator_data,
            attestation_object: artifacts.attestation_object,
            passkey: encode_passkey(&passkey)?,
        })
    }

    fn begin_login(
        &self,
        _user: &User,
        credentials: &[StoredCredential],
    ) -> Result<(RequestChallengeResponse, PasskeyAuthentication), VerifierError> {
        let passkeys = credentials
            .iter()
            .map(decode_passkey)
            .collect::<Result<Vec<_>, _>>()?;

        self.config
            .webauthn()
            .start_passkey_authentication(&passkeys)
            .map_err(|e| VerifierError::Challenge(format!("{:?}", e)))
    }

    fn finish_login(
        &self,
        _user: &User,
        credentials: &[StoredCredential],
        state: &PasskeyAuthentication,
        response: &serde_json::Value,
    ) -> Result<VerifiedCredential, VerifierError> {
        let artifacts = AssertionArtifacts::from_response(response)
            .map_err(|e| VerifierError::MalformedResponse(e.to_string()))?;
        let credential: PublicKeyCredential = serde_json::from_value(response.clone())
            .map_err(|e| VerifierError::MalformedResponse(e.to_string()))?;

        let stored = credentials
            .iter()
            .find(|c| c.credential.credential_id == artifacts.credential_id)
            .ok_or(VerifierError::UnknownCredential)?;

        // webauthn-rs only reports a regressed counter once the signature has
        // verified; every other failure says nothing about the stored credential
        let result = match self
            .config
            .webauthn()
            .finish_passkey_authentication(&credential, state)
        {
            Ok(result) => result,
            Err(WebauthnError::CredentialPossibleCompromise) => {
                return Err(VerifierError::PossibleClone {
                    credential_id: stored.credential.credential_id.clone(),
                })
            }
            Err(e) => return Err(VerifierError::Rejected(format!("{:?}", e))),
        };

        let asserted = result.counter();
        let possible_clone = is_possible_clone(stored.credential.sign_count, asserted);

        let mut passkey = decode_passkey(stored)?;
        passkey.update_credential(&result);

        let mut updated = stored.credential.clone();
        updated.sign_count = asserted;
        updated.clone_warning = possible_clone;
        updated.flags = artifacts.authenticator.credential_flags();
        updated.transports = Vec::new();
        updated.passkey = encode_passkey(&passkey)?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use url::Url;
    use webauthn_authenticator_rs::{softpasskey::SoftPasskey, WebauthnAuthenticator};

    const ORIGIN: &str = "https://example.com";

    fn verifier() -> WebauthnVerifier {
        let origin = Url::parse(ORIGIN).unwrap();
        WebauthnVerifier::new(WebAuthnConfig::new("example.com", &[origin], "Example").unwrap())
    }

    fn authenticator() -> WebauthnAuthenticator<SoftPasskey> {
        WebauthnAuthenticator::new(SoftPasskey::new(true))
    }

    fn register(
        v: &WebauthnVerifier,
        user: &User,
        device: &mut WebauthnAuthenticator<SoftPasskey>,
    ) -> StoredCredential {
        let (options, state) = v.begin_registration(user, &[]).unwrap();
        let response = device
            .do_registration(Url::parse(ORIGIN).unwrap(), options)
            .unwrap();
        let response = serde_json::to_value(&response).unwrap();

        let verified = v.finish_registration(user, &state, &response).unwrap();
        StoredCredential::from_verified(user.id, verified, Utc::now())
    }

    /// Run an assertion with the device, letting the caller tamper with it
    fn login(
        v: &WebauthnVerifier,
        user: &User,
        stored: &StoredCredential,
        device: &mut WebauthnAuthenticator<SoftPasskey>,
        tamper: impl FnOnce(&mut serde_json::Value),
    ) -> Result<VerifiedCredential, VerifierError> {
        let credentials = [stored.clone()];
        let (options, state) = v.begin_login(user, &credentials).unwrap();
        let response = device
            .do_authentication(Url::parse(ORIGIN).unwrap(), options)
            .unwrap();
        let mut response = serde_json::to_value(&response).unwrap();
        tamper(&mut response);

        v.finish_login(user, &credentials, &state, &response)
    }

    /// Pretend the stored credential has already seen `counter` assertions
    fn with_counter(mut stored: StoredCredential, counter: u32) -> StoredCredential {
        stored.credential.sign_count = counter;
        stored.credential.passkey["cred"]["counter"] = serde_json::json!(counter);
        stored
    }

    #[test]
    fn test_registration_maps_attested_credential() {
        let v = verifier();
        let user = User::new("alice", "Alice");
        let mut device = authenticator();

        let stored = register(&v, &user, &mut device);
        let credential = &stored.credential;

        assert!(!credential.credential_id.is_empty());
        assert_eq!(credential.public_key_algorithm, -7);
        assert!(!credential.public_key.is_empty());
        assert_eq!(credential.aaguid.len(), 16);
        assert!(credential.flags.user_present);
        assert!(credential.flags.user_verified);
        assert!(!credential.clone_warning);
        assert_eq!(credential.client_data_hash.len(), 32);

        // The blob webauthn-rs verifies against names the same credential
        let passkey = decode_passkey(&stored).unwrap();
        assert_eq!(
            *passkey.cred_id(),
            CredentialID::from(credential.credential_id.clone())
        );
    }

    #[test]
    fn test_login_updates_stored_credential() {
        let v = verifier();
        let user = User::new("alice", "Alice");
        let mut device = authenticator();
        let stored = register(&v, &user, &mut device);

        let updated = login(&v, &user, &stored, &mut device, |_| {}).unwrap();
        assert_eq!(updated.credential_id, stored.credential.credential_id);
        assert!(updated.sign_count >= stored.credential.sign_count);
        assert!(!updated.clone_warning);
        assert!(updated.flags.user_verified);

        // The updated blob must drive the next ceremony
        let next = StoredCredential::from_verified(user.id, updated, Utc::now());
        let again = login(&v, &user, &next, &mut device, |_| {}).unwrap();
        assert!(!again.clone_warning);
    }

    #[test]
    fn test_regressed_counter_is_possible_clone() {
        let v = verifier();
        let user = User::new("alice", "Alice");
        let mut device = authenticator();
        let stored = with_counter(register(&v, &user, &mut device), 1000);

        let err = login(&v, &user, &stored, &mut device, |_| {}).unwrap_err();
        match err {
            VerifierError::PossibleClone { credential_id } => {
                assert_eq!(credential_id, stored.credential.credential_id)
            }
            other => panic!("expected PossibleClone, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_signature_with_low_counter_is_rejected_not_clone() {
        let v = verifier();
        let user = User::new("alice", "Alice");
        let mut device = authenticator();
        let stored = with_counter(register(&v, &user, &mut device), 1000);

        let err = login(&v, &user, &stored, &mut device, |response| {
            response["response"]["signature"] = serde_json::json!("AAAA");
        })
        .unwrap_err();
        assert!(matches!(err, VerifierError::Rejected(_)));
    }

    #[test]
    fn test_forged_client_data_is_rejected_not_clone() {
        let v = verifier();
        let user = User::new("alice", "Alice");
        let mut device = authenticator();
        let stored = with_counter(register(&v, &user, &mut device), 1000);

        // "{}" in base64url
        let err = login(&v, &user, &stored, &mut device, |response| {
            response["response"]["clientDataJSON"] = serde_json::json!("e30");
        })
        .unwrap_err();
        assert!(matches!(err, VerifierError::Rejected(_)));
    }

    #[test]
    fn test_begin_registration_state_round_trips() {
        let user = User::new("alice", "Alice");
        let (options, state) = verifier().begin_registration(&user, &[]).unwrap();

        let json = serde_json::to_value(&state).unwrap();
        let _: PasskeyRegistration = serde_json::from_value(json).unwrap();

        let options = serde_json::to_value(&options).unwrap();
        assert_eq!(options["publicKey"]["rp"]["id"], "example.com");
        assert_eq!(options["publicKey"]["user"]["name"], "alice");
        assert_eq!(options["publicKey"]["user"]["displayName"], "Alice");
    }

    #[test]
    fn test_finish_registration_rejects_garbage() {
        let user = User::new("alice", "Alice");
        let v = verifier();
        let (_, state) = v.begin_registration(&user, &[]).unwrap();

        let err = v
            .finish_registration(&user, &state, &serde_json::json!({"id": "x"}))
            .unwrap_err();
        assert!(matches!(err, VerifierError::MalformedResponse(_)));
    }

    #[test]
    fn test_begin_login_with_corrupt_passkey() {
        let user = User::new("alice", "Alice");
        let credential = StoredCredential::from_verified(
            user.id,
            VerifiedCredential {
                credential_id: vec![1],
                public_key: vec![],
                public_key_algorithm: -7,
                attestation_type: Default::default(),
                transports: vec![],
                flags: Default::default(),
                aaguid: vec![0; 16],
                sign_count: 0,
                clone_warning: false,
                attachment: Default::default(),
                client_data_hash: vec![],
                authenticator_data: vec![],
                attestation_object: vec![],
                passkey: serde_json::json!({"not": "a passkey"}),
            },
            chrono::Utc::now(),
        );

        let err = verifier().begin_login(&user, &[credential]).unwrap_err();
        assert!(matches!(err, VerifierError::CorruptCredential(_)));
    }
}
