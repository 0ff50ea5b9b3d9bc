//! Dotloop OAuth constants
//!
//! Default endpoints and the canonical scope set. The client ID and secret are
//! deployment configuration and are never compiled in.

/// Authorization server base URL
pub const DEFAULT_AUTH_URL: &str = "https://auth.dotloop.com";

/// Resource API base URL (public v2 gateway)
pub const DEFAULT_API_URL: &str = "https://api-gateway.dotloop.com/public/v2";

/// Redirect URI registered for local development
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:3000/callback";

/// Authorization endpoint path, relative to the auth base URL
pub const AUTHORIZE_PATH: &str = "/oauth/authorize";

/// Token endpoint path for both code exchange and refresh
pub const TOKEN_PATH: &str = "/oauth/token";

/// Scopes requested at login, space-joined in the authorization URL.
/// `contact:*` is left out; contacts are only read through `account:read`.
pub const DEFAULT_SCOPES: &[&str] = &[
    "account:read",
    "profile:*",
    "loop:*",
    "template:*",
    "admin:read",
];

/// Fixed key under which the credential record is persisted
pub const STORAGE_KEY: &str = "dotloop_tokens";

/// User-Agent sent on every upstream call
pub const USER_AGENT: &str = concat!("dotloop-relay/", env!("CARGO_PKG_VERSION"));
