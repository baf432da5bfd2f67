use anyhow::Context;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{token_preview, ErrorBody, TokenManager};
use crate::error::{network_error_kind, GatewayError};

/// 401 reason the backend uses for a failed login; refreshing cannot fix it
pub const INVALID_CREDENTIALS_SENTINEL: &str = "Invalid credentials";

/// User-Agent sent on every request (the backend records it as device info)
pub fn user_agent() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("video-app-client/{} ({})", env!("CARGO_PKG_VERSION"), host)
}

/// Authenticated request gateway
///
/// Attaches the stored access token to every call. On a 401 it refreshes the
/// token through [`TokenManager::resolve_token`] and replays the call once.
pub struct AuthenticatedClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Credential access and refresh coordination
    tokens: Arc<TokenManager>,
}

impl AuthenticatedClient {
    /// Create a new gateway
    pub fn new(
        tokens: Arc<TokenManager>,
        max_connections: usize,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(max_connections)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .user_agent(user_agent())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, tokens })
    }

    /// Send `request` with the current credential, refreshing once on 401
    ///
    /// Any non-401 response is returned unchanged, error statuses included.
    pub async fn dispatch(&self, request: Request) -> Result<Response, GatewayError> {
        let dispatch_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let method = request.method().clone();
        let url = request.url().clone();

        tracing::debug!(
            dispatch_id = %dispatch_id,
            method = %method,
            url = %url,
            "Dispatching request"
        );

        // Taken before any Authorization header is attached
        let mut replay = request.try_clone();
        let mut request = request;
        let mut token = self.tokens.access_token()?;
        let mut retried = false;

        loop {
            if let Some(ref t) = token {
                let value = HeaderValue::from_str(&format!("Bearer {}", t))
                    .context("Access token is not a valid header value")?;
                request.headers_mut().insert(AUTHORIZATION, value);
            }

            let response = self.execute(request, &dispatch_id).await?;
            let status = response.status();

            if status != StatusCode::UNAUTHORIZED {
                tracing::debug!(
                    dispatch_id = %dispatch_id,
                    status = %status,
                    retried = retried,
                    "Received response"
                );
                return Ok(response);
            }

            let error_text = response.text().await.unwrap_or_default();
            let reason = ErrorBody::parse(&error_text)
                .reason()
                .map(str::to_string)
                .unwrap_or_else(|| "Unauthorized".to_string());

            tracing::warn!(
                dispatch_id = %dispatch_id,
                method = %method,
                url = %url,
                reason = %reason,
                retried = retried,
                "Received 401"
            );

            if reason == INVALID_CREDENTIALS_SENTINEL {
                return Err(GatewayError::AuthenticationRejected(reason));
            }

            if retried {
                return Err(GatewayError::AuthenticationRejected(format!(
                    "{} (after token refresh)",
                    reason
                )));
            }
            retried = true;

            let Some(next) = replay.take() else {
                return Err(GatewayError::AuthenticationRejected(format!(
                    "{} (request body cannot be replayed)",
                    reason
                )));
            };

            match self.tokens.resolve_token_after(token.as_deref()).await {
                Ok(new_token) => {
                    tracing::info!(
                        dispatch_id = %dispatch_id,
                        "Retrying with refreshed token ({})",
                        token_preview(&new_token)
                    );
                    token = Some(new_token);
                    request = next;
                }
                Err(e) => {
                    tracing::error!(
                        dispatch_id = %dispatch_id,
                        error = %e,
                        "Token refresh failed, session expired"
                    );
                    return Err(GatewayError::SessionExpired(e));
                }
            }
        }
    }

    /// Execute one attempt, mapping transport failures
    async fn execute(&self, request: Request, dispatch_id: &str) -> Result<Response, GatewayError> {
        let url = request.url().clone();
        self.client.execute(request).await.map_err(|e| {
            tracing::warn!(
                dispatch_id = %dispatch_id,
                error_kind = network_error_kind(&e),
                error = %e,
                url = %url,
                "HTTP request error"
            );
            GatewayError::network(e)
        })
    }

    /// Underlying HTTP client, for building requests
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Credential access and refresh coordination
    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }
}
