//! Request validation module
//!
//! Provides validation utilities for ceremony request bodies and user input.

use serde::de::DeserializeOwned;

use crate::webauthn::CeremonyError;

/// Maximum username length in characters
pub const MAX_USERNAME_LEN: usize = 64;

/// Maximum display name length in characters
pub const MAX_DISPLAY_NAME_LEN: usize = 128;

/// Parses a JSON request body
///
/// Empty bodies, malformed JSON and missing fields are all reported as invalid input.
pub fn parse_json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, CeremonyError> {
    if body.is_empty() {
        return Err(CeremonyError::InvalidInput("Request body is empty".to_string()));
    }
    serde_json::from_slice(body)
        .map_err(|e| CeremonyError::InvalidInput(format!("Invalid JSON body: {}", e)))
}

/// Validates a username
///
/// Accepts 1 to 64 characters from `A-Z a-z 0-9 . _ @ -`.
pub fn validate_username(username: &str) -> Result<(), CeremonyError> {
    if username.is_empty() {
        return Err(CeremonyError::InvalidInput(
            "Username must not be empty".to_string(),
        ));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(CeremonyError::InvalidInput(format!(
            "Username exceeds {} characters",
            MAX_USERNAME_LEN
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-'))
    {
        return Err(CeremonyError::InvalidInput(
            "Username may only contain letters, digits, '.', '_', '@' and '-'".to_string(),
        ));
    }
    Ok(())
}

/// Validates a display name
///
/// Accepts 1 to 128 characters with no control characters.
pub fn validate_display_name(display_name: &str) -> Result<(), CeremonyError> {
    if display_name.trim().is_empty() {
        return Err(CeremonyError::InvalidInput(
            "Display name must not be empty".to_string(),
        ));
    }
    if display_name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(CeremonyError::InvalidInput(format!(
            "Display name exceeds {} characters",
            MAX_DISPLAY_NAME_LEN
        )));
    }
    if display_name.chars().any(char::is_control) {
        return Err(CeremonyError::InvalidInput(
            "Display name must not contain control characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Body {
        username: String,
    }

    #[test]
    fn test_parse_json_body() {
        let body: Body = parse_json_body(br#"{"username":"alice"}"#).unwrap();
        assert_eq!(body.username, "alice");
    }

    #[test]
    fn test_parse_json_body_rejected() {
        assert!(parse_json_body::<Body>(b"").is_err());
        assert!(parse_json_body::<Body>(b"{not json").is_err());
        assert!(parse_json_body::<Body>(br#"{"name":"alice"}"#).is_err());
    }

    #[test]
    fn test_validate_username_ok() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("alice.smith_1@example-corp").is_ok());
        assert!(validate_username(&"a".repeat(MAX_USERNAME_LEN)).is_ok());
    }

    #[test]
    fn test_validate_username_rejected() {
        assert!(validate_username("").is_err());
        assert!(validate_username("alice smith").is_err());
        assert!(validate_username("alice/../bob").is_err());
        assert!(validate_username("élodie").is_err());
        assert!(validate_username(&"a".repeat(MAX_USERNAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name("Alice Smith").is_ok());
        assert!(validate_display_name("Élodie 🔑").is_ok());
        assert!(validate_display_name("").is_err());
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name("Alice\nSmith").is_err());
        assert!(validate_display_name(&"x".repeat(MAX_DISPLAY_NAME_LEN + 1)).is_err());
    }
}
