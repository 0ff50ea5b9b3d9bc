//! Error types for OAuth token lifecycle operations

/// Errors from authorization, token exchange/refresh, and credential storage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("authorization code is missing")]
    MissingCode,

    #[error("no refresh token available")]
    NoRefreshToken,

    #[error("token exchange failed{}: {body}", status_suffix(.status))]
    TokenExchange { status: Option<u16>, body: String },

    #[error("token refresh failed{}: {body}", status_suffix(.status))]
    TokenRefresh { status: Option<u16>, body: String },

    /// Non-2xx from a token endpoint, carried verbatim.
    #[error("token endpoint returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("authorization callback is missing the state parameter")]
    MissingState,

    #[error("authorization callback state does not match the pending login")]
    StateMismatch,

    #[error("authorization denied: {error}")]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    #[error("client credentials not configured: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" ({code})"),
        None => String::new(),
    }
}

impl Error {
    /// Upstream HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Upstream { status, .. } => Some(*status),
            Error::TokenExchange { status, .. } | Error::TokenRefresh { status, .. } => *status,
            _ => None,
        }
    }

    /// Split into (status, body) for re-wrapping as exchange/refresh failures.
    pub(crate) fn into_status_and_body(self) -> (Option<u16>, String) {
        match self {
            Error::Upstream { status, body } => (Some(status), body),
            Error::TokenExchange { status, body } | Error::TokenRefresh { status, body } => {
                (status, body)
            }
            other => (None, other.to_string()),
        }
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
