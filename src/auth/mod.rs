// Authentication module
// Credential storage, token refresh and single-flight coordination

mod manager;
mod refresh;
mod store;
mod types;

pub use manager::{TokenManager, DEFAULT_EXPIRY_SKEW_SECS, DEFAULT_REFRESH_TIMEOUT_SECS};
pub use refresh::refresh_url;
pub use store::{CredentialStore, MemoryCredentialStore, SqliteCredentialStore};
pub use types::{
    token_preview, Credential, ErrorBody, ACCESS_TOKEN_KEY, CREDENTIAL_KEYS,
    DEFAULT_EXPIRES_IN_SECS, EXPIRES_AT_KEY, ISSUED_AT_KEY, REFRESH_TOKEN_KEY,
};
