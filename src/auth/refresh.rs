// Token refresh call against the remote auth endpoint

use chrono::Utc;
use reqwest::Client;

use super::types::{
    expiry_after, ErrorBody, RefreshResponse, TokenData, DEFAULT_EXPIRES_IN_SECS,
};
use crate::error::{network_error_kind, RefreshError};

/// Build the refresh URL from the API base URL
pub fn refresh_url(base_url: &str) -> String {
    format!("{}/auth/refresh", base_url.trim_end_matches('/'))
}

/// Exchange a refresh token for a new access token
///
/// Sends `POST {url}` with the refresh token as bearer credential and an empty body.
pub async fn request_refresh(
    client: &Client,
    url: &str,
    refresh_token: &str,
) -> Result<TokenData, RefreshError> {
    tracing::info!("Refreshing access token...");

    let response = client
        .post(url)
        .bearer_auth(refresh_token)
        .send()
        .await
        .map_err(|e| {
            tracing::warn!(
                error_kind = network_error_kind(&e),
                error = %e,
                url = %url,
                "Refresh request failed"
            );
            RefreshError::Network(e.to_string())
        })?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        let body = ErrorBody::parse(&error_text);
        let message = body
            .reason()
            .map(str::to_string)
            .unwrap_or(error_text);

        tracing::error!(
            status = status.as_u16(),
            reason = %message,
            "Token refresh rejected"
        );

        return Err(RefreshError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    let data: RefreshResponse = response
        .json()
        .await
        .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

    if data.access_token.is_empty() {
        return Err(RefreshError::InvalidResponse(
            "refresh response does not contain access_token".to_string(),
        ));
    }

    let issued_at = Utc::now();
    let expires_in = data.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
    let expires_at = expiry_after(issued_at, expires_in).ok_or_else(|| {
        RefreshError::InvalidResponse(format!("expires_in out of range: {}", expires_in))
    })?;

    tracing::info!(
        "Access token refreshed, expires: {}",
        expires_at.to_rfc3339()
    );

    Ok(TokenData {
        access_token: data.access_token,
        refresh_token: data.refresh_token,
        issued_at,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    #[test]
    fn test_refresh_url() {
        assert_eq!(
            refresh_url("http://localhost:5000/api"),
            "http://localhost:5000/api/auth/refresh"
        );
        assert_eq!(
            refresh_url("http://localhost:5000/api/"),
            "http://localhost:5000/api/auth/refresh"
        );
    }

    #[tokio::test]
    async fn test_refresh_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .match_header("authorization", "Bearer R1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "T2", "token_type": "Bearer", "expires_in": 900}"#)
            .expect(1)
            .create_async()
            .await;

        let before = Utc::now();
        let url = refresh_url(&server.url());
        let data = request_refresh(&Client::new(), &url, "R1").await.unwrap();

        assert_eq!(data.access_token, "T2");
        assert!(data.refresh_token.is_none());
        assert!(data.expires_at >= before + Duration::seconds(900));
        assert!(data.expires_at <= Utc::now() + Duration::seconds(900));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_rotates_refresh_token_when_present() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body(r#"{"access_token": "T2", "refresh_token": "R2"}"#)
            .create_async()
            .await;

        let url = refresh_url(&server.url());
        let data = request_refresh(&Client::new(), &url, "R1").await.unwrap();

        assert_eq!(data.refresh_token.as_deref(), Some("R2"));
        let lifetime = data.expires_at - data.issued_at;
        assert_eq!(lifetime, Duration::seconds(DEFAULT_EXPIRES_IN_SECS));
    }

    #[tokio::test]
    async fn test_refresh_rejected_carries_reason() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/auth/refresh")
            .with_status(401)
            .with_body(r#"{"msg": "Token has expired"}"#)
            .create_async()
            .await;

        let url = refresh_url(&server.url());
        let err = request_refresh(&Client::new(), &url, "R1").await.unwrap_err();

        assert_eq!(
            err,
            RefreshError::Rejected {
                status: 401,
                message: "Token has expired".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_refresh_invalid_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body(r#"{"access_token": ""}"#)
            .create_async()
            .await;

        let url = refresh_url(&server.url());
        let err = request_refresh(&Client::new(), &url, "R1").await.unwrap_err();
        assert!(matches!(err, RefreshError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_refresh_with_out_of_range_expiry() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body(r#"{"access_token": "T2", "expires_in": 1000000000000000}"#)
            .create_async()
            .await;

        let url = refresh_url(&server.url());
        let err = request_refresh(&Client::new(), &url, "R1").await.unwrap_err();
        assert!(matches!(err, RefreshError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_refresh_network_failure() {
        // Nothing listens on port 9 locally
        let err = request_refresh(&Client::new(), "http://127.0.0.1:9/auth/refresh", "R1")
            .await
            .unwrap_err();
        assert!(matches!(err, RefreshError::Network(_)));
    }
}
