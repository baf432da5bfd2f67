use serde::{Deserialize, Serialize};

// ==================================================================================================
// Request Models
// ==================================================================================================

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

// ==================================================================================================
// Response Models
// ==================================================================================================

/// Token pair issued on login and signup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn default_expires_in() -> i64 {
    crate::auth::DEFAULT_EXPIRES_IN_SECS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// `POST /auth/login` and `POST /auth/signup` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub message: Option<String>,
    pub user: UserInfo,
    pub tokens: AuthTokens,
}

/// `GET /auth/me` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_response_deserialization() {
        let json = r#"{
            "message": "Login successful",
            "user": {"id": "u1", "name": "Ada", "email": "ada@example.com"},
            "tokens": {
                "access_token": "T1",
                "refresh_token": "R1",
                "token_type": "Bearer",
                "expires_in": 900
            }
        }"#;

        let response: AuthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.user.email, "ada@example.com");
        assert_eq!(response.tokens.access_token, "T1");
        assert_eq!(response.tokens.expires_in, 900);
    }

    #[test]
    fn test_auth_tokens_defaults() {
        let tokens: AuthTokens =
            serde_json::from_str(r#"{"access_token": "T1", "refresh_token": "R1"}"#).unwrap();
        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.expires_in, 900);
    }

    #[test]
    fn test_profile_without_created_at() {
        let profile: UserProfile =
            serde_json::from_str(r#"{"id": "u1", "name": "Ada", "email": "a@b.c", "created_at": null}"#)
                .unwrap();
        assert!(profile.created_at.is_none());
    }
}
