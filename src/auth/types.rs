// Authentication types

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Store key for the current access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Store key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Store key for the access token expiry (RFC 3339)
pub const EXPIRES_AT_KEY: &str = "expires_at";

/// Store key for the access token issue time (RFC 3339)
pub const ISSUED_AT_KEY: &str = "issued_at";

/// Every key the gateway owns, cleared together on logout or refresh failure
pub const CREDENTIAL_KEYS: [&str; 4] = [
    ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    EXPIRES_AT_KEY,
    ISSUED_AT_KEY,
];

/// Access token lifetime the backend issues when a response omits `expires_in`
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 900;

/// Complete credential set as persisted in the store
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Token data produced by a successful refresh
#[derive(Debug, Clone)]
pub struct TokenData {
    pub access_token: String,
    /// Present only when the server rotates the refresh token
    pub refresh_token: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// `POST /auth/refresh` response body
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Error body shape used by the backend
///
/// Route handlers answer `{"error": "..."}`, the JWT layer answers `{"msg": "..."}`.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl ErrorBody {
    /// Parse an error body, tolerating non-JSON payloads
    pub fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_default()
    }

    /// Human-readable reason, preferring the handler-level `error` field
    pub fn reason(&self) -> Option<&str> {
        self.error.as_deref().or(self.msg.as_deref())
    }
}

/// Expiry `expires_in` seconds after `issued_at`, or `None` when out of range
pub fn expiry_after(issued_at: DateTime<Utc>, expires_in: i64) -> Option<DateTime<Utc>> {
    chrono::Duration::try_seconds(expires_in)
        .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
}

/// Format a token for logs without exposing it
pub fn token_preview(token: &str) -> String {
    let end = token
        .char_indices()
        .nth(8)
        .map(|(idx, _)| idx)
        .unwrap_or(token.len());
    format!("{}...", &token[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_reason() {
        let body = ErrorBody::parse(r#"{"error": "Invalid credentials"}"#);
        assert_eq!(body.reason(), Some("Invalid credentials"));

        let body = ErrorBody::parse(r#"{"msg": "Token has expired"}"#);
        assert_eq!(body.reason(), Some("Token has expired"));

        let body = ErrorBody::parse("<html>Unauthorized</html>");
        assert_eq!(body.reason(), None);
    }

    #[test]
    fn test_refresh_response_optional_fields() {
        let data: RefreshResponse =
            serde_json::from_str(r#"{"access_token": "T2", "expires_in": 900}"#).unwrap();
        assert_eq!(data.access_token, "T2");
        assert_eq!(data.expires_in, Some(900));
        assert!(data.refresh_token.is_none());

        let data: RefreshResponse = serde_json::from_str(r#"{"access_token": "T3"}"#).unwrap();
        assert!(data.expires_in.is_none());
    }

    #[test]
    fn test_token_preview() {
        assert_eq!(token_preview("abcdefghijklmnop"), "abcdefgh...");
        assert_eq!(token_preview("short"), "short...");
    }
}
