// Error handling module
// Defines gateway, refresh and credential store error types

use thiserror::Error;

/// Errors surfaced by the authenticated request gateway and the typed API client
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Credentials were rejected and retrying cannot help
    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// Token refresh failed; stored credentials have been cleared
    #[error("Session expired: {0}")]
    SessionExpired(#[source] RefreshError),

    /// Transport-level failure on the original or retried call
    #[error("Network failure ({kind}): {source}")]
    NetworkFailure {
        kind: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success response interpreted by the typed API client
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Success response whose body could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Credential store failure
    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// Wrap a reqwest transport error, categorising it for logs
    pub fn network(source: reqwest::Error) -> Self {
        GatewayError::NetworkFailure {
            kind: network_error_kind(&source),
            source,
        }
    }

    /// True when the caller has to log in again
    pub fn is_session_expired(&self) -> bool {
        matches!(self, GatewayError::SessionExpired(_))
    }
}

/// Outcome of a failed refresh, shared with every waiter of that refresh
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// No refresh token is stored
    #[error("no refresh token available")]
    NoRefreshToken,

    /// Auth endpoint answered with a non-success status
    #[error("refresh rejected: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// Transport failure talking to the auth endpoint
    #[error("refresh request failed: {0}")]
    Network(String),

    /// Auth endpoint answered 2xx with an unusable body
    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),

    /// Refresh did not finish within the configured timeout
    #[error("refresh timed out after {0}s")]
    Timeout(u64),

    /// Reading or writing credentials failed during refresh
    #[error("credential store error during refresh: {0}")]
    Store(String),

    /// The task driving the refresh was dropped before it finished
    #[error("refresh abandoned before completion")]
    Abandoned,
}

/// Credential store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential store lock poisoned")]
    Poisoned,
}

impl From<StoreError> for RefreshError {
    fn from(err: StoreError) -> Self {
        RefreshError::Store(err.to_string())
    }
}

/// Categorise a reqwest error the way it shows up in logs
pub fn network_error_kind(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
