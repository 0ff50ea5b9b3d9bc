//! Token endpoint seam used by the token manager
//!
//! `TokenEndpoint` abstracts "something that can exchange a code or refresh a
//! token". The manager only ever talks to this trait, so it never needs the
//! client secret. `RelayTokenEndpoint` is the production implementation: it
//! posts JSON to the secret-hiding relay, which adds the secret server side.

use std::future::Future;
use std::pin::Pin;

use reqwest::header::{ACCEPT, USER_AGENT as USER_AGENT_HEADER};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::USER_AGENT;
use crate::error::{Error, Result};
use crate::token::TokenResponse;

/// Relay path for the authorization code exchange.
pub const RELAY_TOKEN_PATH: &str = "/oauth/token";

/// Relay path for the refresh grant.
pub const RELAY_REFRESH_PATH: &str = "/oauth/refresh";

/// JSON body of `POST /oauth/token` on the relay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
}

/// JSON body of `POST /oauth/refresh` on the relay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Exchanges codes and refresh tokens for new tokens.
///
/// Uses `Pin<Box<dyn Future>>` rather than `async fn` so implementations can
/// be held as `Arc<dyn TokenEndpoint>`.
pub trait TokenEndpoint: Send + Sync {
    fn exchange<'a>(
        &'a self,
        code: &'a str,
        state: Option<&'a str>,
        redirect_uri: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>>;

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>>;
}

/// HTTP client of the secret-hiding relay.
#[derive(Debug, Clone)]
pub struct RelayTokenEndpoint {
    http: reqwest::Client,
    base_url: String,
}

impl RelayTokenEndpoint {
    /// `base_url` is the relay origin, e.g. `http://127.0.0.1:3000`.
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<TokenResponse> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "calling token relay");

        let response = self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT_HEADER, USER_AGENT)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("token relay request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            warn!(path, status = status.as_u16(), "token relay returned error");
            return Err(Error::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::InvalidResponse(format!("token relay response: {e}")))
    }
}

impl TokenEndpoint for RelayTokenEndpoint {
    fn exchange<'a>(
        &'a self,
        code: &'a str,
        state: Option<&'a str>,
        redirect_uri: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>> {
        Box::pin(async move {
            let body = ExchangeRequest {
                code: Some(code.to_string()),
                state: state.map(str::to_string),
                redirect_uri: redirect_uri.map(str::to_string),
            };
            self.post(RELAY_TOKEN_PATH, &body).await
        })
    }

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>> {
        Box::pin(async move {
            let body = RefreshRequest {
                refresh_token: Some(refresh_token.to_string()),
            };
            self.post(RELAY_REFRESH_PATH, &body).await
        })
    }
}
