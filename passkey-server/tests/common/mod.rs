//! Shared fixtures for integration tests: a deterministic verifier and
//! request helpers for driving the router.

#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::ServiceExt;

use passkey_server::{
    create_router,
    webauthn::{
        is_possible_clone, Attachment, AttestationType, CredentialFlags, PasskeyVerifier,
        StoredCredential, Transport, User, VerifiedCredential, VerifierError,
    },
    AppState, CeremonyOrchestrator, Config, Storage,
};

/// Challenge state persisted between begin and finish
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FakeState {
    pub challenge: String,
    pub user_id: uuid::Uuid,
}

/// Client response understood by [`FakeVerifier`]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FakeResponse {
    challenge: String,
    credential_id: String,
    #[serde(default)]
    sign_count: u32,
    #[serde(default)]
    transports: Vec<String>,
    /// Simulates a bad signature when false
    #[serde(default = "default_true")]
    valid: bool,
    /// Reject regressed counters instead of accepting with a warning
    #[serde(default)]
    strict_counter: bool,
}

fn default_true() -> bool {
    true
}

/// Verifier that trusts responses echoing the issued challenge.
///
/// Challenges are `challenge-<n>` from a per-instance counter so tests can
/// predict them.
#[derive(Debug, Default)]
pub struct FakeVerifier {
    counter: AtomicU64,
}

impl FakeVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_challenge(&self) -> String {
        format!("challenge-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn parse(response: &Value) -> Result<FakeResponse, VerifierError> {
        serde_json::from_value(response.clone())
            .map_err(|e| VerifierError::MalformedResponse(e.to_string()))
    }

    fn check(state: &FakeState, user: &User, response: &FakeResponse) -> Result<(), VerifierError> {
        if state.user_id != user.id {
            return Err(VerifierError::Rejected("user handle mismatch".into()));
        }
        if state.challenge != response.challenge {
            return Err(VerifierError::Rejected("challenge mismatch".into()));
        }
        if !response.valid {
            return Err(VerifierError::Rejected("bad signature".into()));
        }
        Ok(())
    }
}

fn decode_id(id: &str) -> Result<Vec<u8>, VerifierError> {
    URL_SAFE_NO_PAD
        .decode(id)
        .map_err(|e| VerifierError::MalformedResponse(e.to_string()))
}

impl PasskeyVerifier for FakeVerifier {
    type RegistrationState = FakeState;
    type AuthenticationState = FakeState;
    type CreationOptions = Value;
    type RequestOptions = Value;

    fn begin_registration(
        &self,
        user: &User,
        existing: &[StoredCredential],
    ) -> Result<(Value, FakeState), VerifierError> {
        let challenge = self.next_challenge();
        let exclude: Vec<Value> = existing
            .iter()
            .map(|c| json!({ "type": "public-key", "id": c.credential_id_b64() }))
            .collect();

        let options = json!({
            "publicKey": {
                "challenge": challenge,
                "rp": { "id": "localhost", "name": "Test" },
                "user": {
                    "id": user.id.to_string(),
                    "name": user.username,
                    "displayName": user.display_name,
                },
                "excludeCredentials": exclude,
            }
        });
        Ok((
            options,
            FakeState {
                challenge,
                user_id: user.id,
            },
        ))
    }

    fn finish_registration(
        &self,
        user: &User,
        state: &FakeState,
        response: &Value,
    ) -> Result<VerifiedCredential, VerifierError> {
        let response = Self::parse(response)?;
        Self::check(state, user, &response)?;
        let credential_id = decode_id(&response.credential_id)?;

        Ok(VerifiedCredential {
            credential_id,
            public_key: vec![0xa5, 0x01, 0x02, 0x03, 0x26],
            public_key_algorithm: -7,
            attestation_type: AttestationType::None,
            transports: Transport::parse_all(response.transports.iter().map(String::as_str)),
            flags: CredentialFlags {
                user_present: true,
                user_verified: true,
                backup_eligible: true,
                backup_state: true,
            },
            aaguid: vec![0xad; 16],
            sign_count: response.sign_count,
            clone_warning: false,
            attachment: Attachment::Platform,
            client_data_hash: vec![0x11; 32],
            authenticator_data: vec![0x22; 37],
            attestation_object: vec![0xa3],
            passkey: json!({ "cred": response.credential_id, "counter": response.sign_count }),
        })
    }

    fn begin_login(
        &self,
        user: &User,
        credentials: &[StoredCredential],
    ) -> Result<(Value, FakeState), VerifierError> {
        let challenge = self.next_challenge();
        let allow: Vec<Value> = credentials
            .iter()
            .map(|c| json!({ "type": "public-key", "id": c.credential_id_b64() }))
            .collect();

        Ok((
            json!({ "publicKey": { "challenge": challenge, "allowCredentials": allow } }),
            FakeState {
                challenge,
                user_id: user.id,
            },
        ))
    }

    fn finish_login(
        &self,
        user: &User,
        credentials: &[StoredCredential],
        state: &FakeState,
        response: &Value,
    ) -> Result<VerifiedCredential, VerifierError> {
        let response = Self::parse(response)?;
        let credential_id = decode_id(&response.credential_id)?;
        let stored = credentials
            .iter()
            .find(|c| c.credential.credential_id == credential_id)
            .ok_or(VerifierError::UnknownCredential)?;

        // The counter only means something once the assertion has verified
        Self::check(state, user, &response)?;
        let possible_clone = is_possible_clone(stored.credential.sign_count, response.sign_count);
        if possible_clone && response.strict_counter {
            return Err(VerifierError::PossibleClone { credential_id });
        }

        let mut updated = stored.credential.clone();
        updated.sign_count = response.sign_count;
        updated.clone_warning = possible_clone;
        updated.transports = Vec::new();
        updated.passkey = json!({ "cred": response.credential_id, "counter": response.sign_count });
        Ok(updated)
    }
}

pub fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Registration response for [`FakeVerifier`]
pub fn registration_response(challenge: &str, credential_id: &[u8]) -> Value {
    json!({
        "challenge": challenge,
        "credentialId": b64(credential_id),
        "signCount": 0,
        "transports": ["internal", "hybrid"],
    })
}

/// Assertion response for [`FakeVerifier`]
pub fn assertion_response(challenge: &str, credential_id: &[u8], sign_count: u32) -> Value {
    json!({
        "challenge": challenge,
        "credentialId": b64(credential_id),
        "signCount": sign_count,
    })
}

pub fn test_storage() -> Arc<Storage> {
    Arc::new(Storage::in_memory(300))
}

pub fn orchestrator() -> (CeremonyOrchestrator<FakeVerifier>, Arc<Storage>) {
    let storage = test_storage();
    (
        CeremonyOrchestrator::new(FakeVerifier::new(), Arc::clone(&storage)),
        storage,
    )
}

/// Router over in-memory storage plus a handle on that storage
pub struct TestApp {
    pub router: Router,
    pub storage: Arc<Storage>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let storage = Arc::new(Storage::in_memory(config.session_ttl_secs));
        let state = Arc::new(AppState::new(
            FakeVerifier::new(),
            Arc::clone(&storage),
            &config,
        ));
        Self {
            router: create_router(state, &config),
            storage,
        }
    }

    pub async fn post(&self, uri: &str, body: &str, sid: Option<&str>) -> TestResponse {
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(sid) = sid {
            request = request.header(header::COOKIE, format!("sid={}", sid));
        }
        self.send(request.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn post_json(&self, uri: &str, body: &Value, sid: Option<&str>) -> TestResponse {
        self.post(uri, &body.to_string(), sid).await
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let set_cookies: Vec<String> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            set_cookies,
            body,
        }
    }

    /// Run begin+finish registration, returning the finish response
    pub async fn register(&self, username: &str, credential_id: &[u8]) -> TestResponse {
        let begin = self
            .post_json(
                "/api/register/begin",
                &json!({ "username": username, "displayName": username }),
                None,
            )
            .await;
        assert_eq!(begin.status, StatusCode::OK, "begin failed: {}", begin.body);

        let sid = begin.session_id().unwrap();
        self.post_json(
            "/api/register/finish",
            &registration_response(begin.challenge(), credential_id),
            Some(&sid),
        )
        .await
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub set_cookies: Vec<String>,
    pub body: Value,
}

impl TestResponse {
    /// The `sid` Set-Cookie header, if any
    pub fn sid_cookie(&self) -> Option<&str> {
        self.set_cookies
            .iter()
            .map(String::as_str)
            .find(|c| c.starts_with("sid="))
    }

    /// Value of a non-empty `sid` cookie
    pub fn session_id(&self) -> Option<String> {
        let cookie = self.sid_cookie()?;
        let value = cookie.trim_start_matches("sid=").split(';').next()?;
        (!value.is_empty()).then(|| value.to_string())
    }

    pub fn challenge(&self) -> &str {
        self.body["publicKey"]["challenge"].as_str().unwrap()
    }
}
