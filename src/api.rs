// Typed client for the video app REST API
// Every call goes through the authenticated gateway

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::auth::{ErrorBody, TokenManager};
use crate::error::{GatewayError, Result};
use crate::http_client::AuthenticatedClient;
use crate::models::{
    AuthResponse, DashboardResponse, HealthStatus, LoginRequest, MessageResponse, SignupRequest,
    StreamInfo, UserProfile, WatchProgress,
};

/// Video app API client
pub struct VideoApiClient {
    gateway: Arc<AuthenticatedClient>,
    base_url: String,
}

impl VideoApiClient {
    pub fn new(gateway: Arc<AuthenticatedClient>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { gateway, base_url }
    }

    /// Credential access, for status checks and manual refresh
    pub fn tokens(&self) -> &Arc<TokenManager> {
        self.gateway.tokens()
    }

    /// Register a new account and store its tokens
    pub async fn signup(&self, name: &str, email: &str, password: &str) -> Result<AuthResponse> {
        let body = SignupRequest {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let response: AuthResponse = self
            .send_json(self.request(Method::POST, "/auth/signup").json(&body))
            .await?;
        self.store_tokens(&response)?;
        tracing::info!("Signed up as {}", response.user.email);
        Ok(response)
    }

    /// Log in and store the issued tokens
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response: AuthResponse = self
            .send_json(self.request(Method::POST, "/auth/login").json(&body))
            .await?;
        self.store_tokens(&response)?;
        tracing::info!("Logged in as {}", response.user.email);
        Ok(response)
    }

    /// Current user profile
    pub async fn me(&self) -> Result<UserProfile> {
        self.send_json(self.request(Method::GET, "/auth/me")).await
    }

    /// Revoke the session server-side, then clear local credentials regardless
    pub async fn logout(&self) -> Result<()> {
        let outcome: Result<MessageResponse> =
            self.send_json(self.request(Method::POST, "/auth/logout")).await;

        if let Err(ref e) = outcome {
            tracing::warn!("Server-side logout failed, clearing local session anyway: {}", e);
        }

        self.tokens().clear_credentials()?;
        Ok(())
    }

    /// One page of active videos
    pub async fn dashboard(&self, page: u32, per_page: u32) -> Result<DashboardResponse> {
        let builder = self
            .request(Method::GET, "/dashboard")
            .query(&[("page", page), ("per_page", per_page)]);
        self.send_json(builder).await
    }

    /// Stream details for a video, authorised by its playback token
    pub async fn stream(&self, video_id: &str, playback_token: &str) -> Result<StreamInfo> {
        let path = format!("/video/{}/stream", video_id);
        let builder = self
            .request(Method::GET, &path)
            .query(&[("token", playback_token)]);
        self.send_json(builder).await
    }

    /// Record watch progress for a video
    pub async fn track_watch(
        &self,
        video_id: &str,
        progress: &WatchProgress,
    ) -> Result<MessageResponse> {
        let path = format!("/video/{}/watch", video_id);
        self.send_json(self.request(Method::POST, &path).json(progress))
            .await
    }

    /// Backend health; needs no credentials
    pub async fn health(&self) -> Result<HealthStatus> {
        self.send_json(self.request(Method::GET, "/health")).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.gateway
            .client()
            .request(method, format!("{}{}", self.base_url, path))
    }

    fn store_tokens(&self, response: &AuthResponse) -> Result<()> {
        let tokens = &response.tokens;
        self.tokens()
            .store_session(&tokens.access_token, &tokens.refresh_token, tokens.expires_in)?;
        Ok(())
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let request = builder.build().map_err(|e| {
            GatewayError::Internal(anyhow::Error::new(e).context("Failed to build request"))
        })?;
        let response = self.gateway.dispatch(request).await?;
        decode(response).await
    }
}

/// Decode a success body, or turn an error status into `GatewayError::Api`
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        let message = ErrorBody::parse(&error_text)
            .reason()
            .map(str::to_string)
            .unwrap_or(error_text);

        tracing::debug!(status = status.as_u16(), message = %message, "API error response");
        return Err(GatewayError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let body = response.text().await.map_err(GatewayError::network)?;
    serde_json::from_str(&body).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}
