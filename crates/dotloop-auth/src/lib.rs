//! Dotloop OAuth token lifecycle
//!
//! Provides authorization URL and state handling, the upstream token endpoint
//! client (server side, holds the client secret), the client of the
//! secret-hiding relay, credential persistence, and the token lifecycle
//! manager that ties them together. The manager never sees the client secret.
//!
//! Login flow:
//! 1. `TokenManager::begin_authorization()` generates a fresh state and the URL
//! 2. The user consents at the authorization server and is redirected back
//! 3. `TokenManager::complete_authorization()` verifies the state and exchanges
//!    the code through a `TokenEndpoint` (normally `RelayTokenEndpoint`)
//! 4. The relay calls `TokenClient::exchange_code()` with HTTP Basic auth
//! 5. The resulting `CredentialRecord` is persisted via a `CredentialStore`
//! 6. Later, `TokenManager::refresh()` renews the access token the same way

pub mod authorize;
pub mod constants;
pub mod credentials;
pub mod endpoint;
pub mod error;
pub mod manager;
pub mod settings;
pub mod token;

pub use authorize::{CallbackParams, PendingAuthorization, build_authorization_url, generate_state};
pub use constants::*;
pub use credentials::{
    CredentialRecord, CredentialStore, FileCredentialStore, MemoryCredentialStore, now_millis,
};
pub use endpoint::{ExchangeRequest, RefreshRequest, RelayTokenEndpoint, TokenEndpoint};
pub use error::{Error, Result};
pub use manager::TokenManager;
pub use settings::OAuthSettings;
pub use token::{ClientCredentials, TokenClient, TokenResponse};
