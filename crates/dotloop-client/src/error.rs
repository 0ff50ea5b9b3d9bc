//! Error types for the authenticated request relay and API facade

/// Errors surfaced to callers of `ApiRelay` and `DotloopApi`.
///
/// Non-2xx responses from `ApiRelay::request` are NOT errors; they come back
/// as an `ApiResponse` with the upstream status. Only the typed facade
/// methods turn them into `Api`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No usable access token and no refresh token. No request was sent.
    #[error("authentication required: no valid access token and no refresh token")]
    AuthenticationRequired,

    /// Token refresh failed; propagated unchanged from the token manager.
    #[error(transparent)]
    Auth(#[from] dotloop_auth::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl Error {
    /// HTTP status carried by an `Api` error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
