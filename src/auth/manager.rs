use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

use super::refresh;
use super::store::CredentialStore;
use super::types::{
    expiry_after, token_preview, Credential, TokenData, ACCESS_TOKEN_KEY, CREDENTIAL_KEYS,
    EXPIRES_AT_KEY, ISSUED_AT_KEY, REFRESH_TOKEN_KEY,
};
use crate::error::{GatewayError, RefreshError, StoreError};

/// Default margin before expiry at which a token counts as expired (seconds)
pub const DEFAULT_EXPIRY_SKEW_SECS: i64 = 60;

/// Default upper bound on a single refresh call (seconds)
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 15;

type RefreshOutcome = std::result::Result<String, RefreshError>;

/// Caller parked until the in-flight refresh resolves
type Waiter = oneshot::Sender<RefreshOutcome>;

/// Single-flight refresh state
enum RefreshState {
    Idle,
    Refreshing { waiters: VecDeque<Waiter> },
}

/// What a caller of `resolve_token` ended up doing
enum Ticket {
    /// Owns the refresh call
    Lead,
    /// Parked behind the in-flight refresh
    Wait(oneshot::Receiver<RefreshOutcome>),
    /// A refresh already replaced the token the caller failed with
    Current(String),
}

/// Token manager
/// Owns credential reads/writes and coordinates single-flight token refresh
pub struct TokenManager {
    /// Credential persistence
    store: Arc<dyn CredentialStore>,

    /// HTTP client for refresh requests
    client: Client,

    /// Remote auth endpoint
    refresh_url: String,

    /// Upper bound on a single refresh call
    refresh_timeout: std::time::Duration,

    /// Margin before expiry at which a token counts as expired
    expiry_skew: Duration,

    /// Refresh coordination; never held across an await
    refresh_state: Mutex<RefreshState>,
}

impl TokenManager {
    /// Create a new TokenManager over `store`, refreshing against `refresh_url`
    pub fn new(
        store: Arc<dyn CredentialStore>,
        refresh_url: impl Into<String>,
        refresh_timeout: u64,
    ) -> Result<Self> {
        // The overall deadline is enforced around the call in `refresh_and_store`
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(refresh_timeout))
            .user_agent(crate::http_client::user_agent())
            .build()
            .context("Failed to create refresh HTTP client")?;

        Ok(Self {
            store,
            client,
            refresh_url: refresh_url.into(),
            refresh_timeout: std::time::Duration::from_secs(refresh_timeout),
            expiry_skew: Duration::seconds(DEFAULT_EXPIRY_SKEW_SECS),
            refresh_state: Mutex::new(RefreshState::Idle),
        })
    }

    /// Override the expiry skew margin
    pub fn with_expiry_skew(mut self, skew_secs: i64) -> Self {
        self.expiry_skew = Duration::try_seconds(skew_secs)
            .unwrap_or_else(|| Duration::seconds(DEFAULT_EXPIRY_SKEW_SECS));
        self
    }

    /// Underlying credential store
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Current access token, read fresh from the store
    pub fn access_token(&self) -> std::result::Result<Option<String>, StoreError> {
        self.store.get(ACCESS_TOKEN_KEY)
    }

    /// Presence check only; does not validate signature or expiry
    pub fn is_authenticated(&self) -> bool {
        match self.access_token() {
            Ok(token) => token.is_some(),
            Err(e) => {
                tracing::warn!("Failed to read access token: {}", e);
                false
            }
        }
    }

    /// Advisory expiry check; never gates dispatch
    pub fn is_token_expired(&self) -> bool {
        self.is_token_expired_at(Utc::now())
    }

    /// Expiry check against an explicit clock
    pub fn is_token_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.store.get(EXPIRES_AT_KEY) {
            Ok(Some(raw)) => match parse_datetime(&raw) {
                Some(expires_at) => now
                    .checked_add_signed(self.expiry_skew)
                    .map_or(true, |deadline| deadline > expires_at),
                None => {
                    tracing::warn!("Stored expiry is not a valid timestamp: {}", raw);
                    true
                }
            },
            Ok(None) => true, // No expiration info, assume expired
            Err(e) => {
                tracing::warn!("Failed to read token expiry: {}", e);
                true
            }
        }
    }

    /// Stored credential set, if an access token is present
    pub fn credential(&self) -> std::result::Result<Option<Credential>, StoreError> {
        let Some(access_token) = self.store.get(ACCESS_TOKEN_KEY)? else {
            return Ok(None);
        };

        Ok(Some(Credential {
            access_token,
            refresh_token: self.store.get(REFRESH_TOKEN_KEY)?,
            issued_at: self
                .store
                .get(ISSUED_AT_KEY)?
                .as_deref()
                .and_then(parse_datetime),
            expires_at: self
                .store
                .get(EXPIRES_AT_KEY)?
                .as_deref()
                .and_then(parse_datetime),
        }))
    }

    /// Persist a freshly issued token pair (login / signup)
    pub fn store_session(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in: i64,
    ) -> std::result::Result<(), GatewayError> {
        let issued_at = Utc::now();
        let expires_at = expiry_after(issued_at, expires_in)
            .ok_or_else(|| {
                GatewayError::InvalidResponse(format!("expires_in out of range: {}", expires_in))
            })?
            .to_rfc3339();
        let issued_at = issued_at.to_rfc3339();

        self.store.set_many(&[
            (ACCESS_TOKEN_KEY, access_token),
            (REFRESH_TOKEN_KEY, refresh_token),
            (ISSUED_AT_KEY, issued_at.as_str()),
            (EXPIRES_AT_KEY, expires_at.as_str()),
        ])?;

        tracing::info!(
            "Session stored (token: {}), expires: {}",
            token_preview(access_token),
            expires_at
        );
        Ok(())
    }

    /// Remove every stored credential (logged-out state)
    pub fn clear_credentials(&self) -> std::result::Result<(), StoreError> {
        self.store.remove_many(&CREDENTIAL_KEYS)?;
        tracing::info!("Stored credentials cleared");
        Ok(())
    }

    /// True while a refresh call is in flight
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock_state(), RefreshState::Refreshing { .. })
    }

    /// Obtain a new access token, sharing one refresh call among concurrent callers
    pub async fn resolve_token(&self) -> RefreshOutcome {
        self.resolve_token_after(None).await
    }

    /// Like `resolve_token`, but skips the refresh when the stored access token
    /// already differs from `rejected`, the token the caller was refused with
    pub(crate) async fn resolve_token_after(&self, rejected: Option<&str>) -> RefreshOutcome {
        // Check-and-flip happens under the lock with no await in between
        let ticket = {
            let mut state = self.lock_state();
            let parked = match &mut *state {
                RefreshState::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push_back(tx);
                    tracing::debug!(
                        queued = waiters.len(),
                        "Refresh in flight, waiting for its outcome"
                    );
                    Some(Ticket::Wait(rx))
                }
                RefreshState::Idle => None,
            };

            match parked {
                Some(ticket) => ticket,
                None => match self.replaced_token(rejected) {
                    Some(current) => Ticket::Current(current),
                    None => {
                        *state = RefreshState::Refreshing {
                            waiters: VecDeque::new(),
                        };
                        Ticket::Lead
                    }
                },
            }
        };

        match ticket {
            Ticket::Current(token) => {
                tracing::debug!(
                    "Access token already refreshed ({}), skipping refresh",
                    token_preview(&token)
                );
                Ok(token)
            }
            Ticket::Wait(rx) => rx.await.unwrap_or(Err(RefreshError::Abandoned)),
            Ticket::Lead => {
                let guard = RefreshGuard {
                    manager: self,
                    settled: false,
                };
                let outcome = self.perform_refresh().await;
                guard.finish(&outcome);
                outcome
            }
        }
    }

    /// Stored access token, if it is not the one that was just rejected
    fn replaced_token(&self, rejected: Option<&str>) -> Option<String> {
        let rejected = rejected?;
        match self.store.get(ACCESS_TOKEN_KEY) {
            Ok(Some(current)) if current != rejected => Some(current),
            _ => None,
        }
    }

    /// Run the refresh call; on any failure the session is cleared
    async fn perform_refresh(&self) -> RefreshOutcome {
        let outcome = self.refresh_and_store().await;

        if let Err(ref e) = outcome {
            tracing::error!("Token refresh failed: {}", e);
            if let Err(clear_err) = self.clear_credentials() {
                tracing::error!("Failed to clear credentials after refresh failure: {}", clear_err);
            }
        }

        outcome
    }

    async fn refresh_and_store(&self) -> RefreshOutcome {
        let refresh_token = self
            .store
            .get(REFRESH_TOKEN_KEY)?
            .ok_or(RefreshError::NoRefreshToken)?;

        let data = tokio::time::timeout(
            self.refresh_timeout,
            refresh::request_refresh(&self.client, &self.refresh_url, &refresh_token),
        )
        .await
        .map_err(|_| RefreshError::Timeout(self.refresh_timeout.as_secs()))??;

        self.write_token_data(&data)?;
        Ok(data.access_token)
    }

    fn write_token_data(&self, data: &TokenData) -> std::result::Result<(), StoreError> {
        let issued_at = data.issued_at.to_rfc3339();
        let expires_at = data.expires_at.to_rfc3339();

        let mut entries = vec![
            (ACCESS_TOKEN_KEY, data.access_token.as_str()),
            (ISSUED_AT_KEY, issued_at.as_str()),
            (EXPIRES_AT_KEY, expires_at.as_str()),
        ];
        if let Some(ref rotated) = data.refresh_token {
            entries.push((REFRESH_TOKEN_KEY, rotated.as_str()));
        }

        self.store.set_many(&entries)
    }

    /// Reset to `Idle` and hand `outcome` to every parked caller, oldest first
    fn settle(&self, outcome: &RefreshOutcome) {
        let waiters = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing { waiters } => waiters,
                RefreshState::Idle => VecDeque::new(),
            }
        };

        if !waiters.is_empty() {
            tracing::debug!(waiters = waiters.len(), "Resuming callers parked on refresh");
        }

        for waiter in waiters {
            // A receiver that went away has nobody left to notify
            let _ = waiter.send(outcome.clone());
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.refresh_state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        match &*self.lock_state() {
            RefreshState::Refreshing { waiters } => waiters.len(),
            RefreshState::Idle => 0,
        }
    }
}

/// Settles the refresh state even if the leading future is dropped mid-flight
struct RefreshGuard<'a> {
    manager: &'a TokenManager,
    settled: bool,
}

impl RefreshGuard<'_> {
    fn finish(mut self, outcome: &RefreshOutcome) {
        self.manager.settle(outcome);
        self.settled = true;
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("Token refresh dropped before completion, releasing waiters");
            self.manager.settle(&Err(RefreshError::Abandoned));
        }
    }
}

/// Parse an RFC 3339 timestamp as stored by this crate
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
