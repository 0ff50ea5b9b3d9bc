//! Upstream token endpoint client
//!
//! Handles the two token endpoint interactions on behalf of the relay:
//! 1. Authorization code exchange (`grant_type=authorization_code`)
//! 2. Token refresh (`grant_type=refresh_token`)
//!
//! Both POST a form body to `{auth_url}/oauth/token` with HTTP Basic
//! authentication built from `client_id:client_secret`. This module is the only
//! place the client secret is used, and it only runs server side.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::Secret;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT as USER_AGENT_HEADER};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constants::USER_AGENT;
use crate::error::{Error, Result};

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds. Fields the upstream adds beyond the
/// standard ones are kept in `extra` so the relay can return the payload unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TokenResponse {
    /// Log the response shape with presence flags only.
    pub(crate) fn log_received(&self, grant_type: &str) {
        info!(
            grant_type,
            has_access_token = !self.access_token.is_empty(),
            has_refresh_token = self.refresh_token.is_some(),
            expires_in = ?self.expires_in,
            token_type = ?self.token_type,
            scope = ?self.scope,
            "token endpoint returned tokens"
        );
    }
}

/// OAuth client ID and secret used for HTTP Basic authentication.
#[derive(Clone)]
pub struct ClientCredentials {
    client_id: String,
    client_secret: Secret<String>,
}

impl ClientCredentials {
    /// Returns `Configuration` if either value is blank.
    pub fn new(client_id: String, client_secret: Secret<String>) -> Result<Self> {
        if client_id.trim().is_empty() {
            return Err(Error::Configuration("client_id is empty".into()));
        }
        if client_secret.is_blank() {
            return Err(Error::Configuration("client_secret is empty".into()));
        }
        Ok(Self {
            client_id,
            client_secret,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// `Basic base64(client_id:client_secret)`
    fn basic_authorization(&self) -> String {
        let raw = format!("{}:{}", self.client_id, self.client_secret.expose());
        format!("Basic {}", STANDARD.encode(raw))
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .finish()
    }
}

/// Confidential client for the upstream token endpoint.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    token_endpoint: String,
    credentials: ClientCredentials,
}

impl TokenClient {
    pub fn new(http: reqwest::Client, token_endpoint: String, credentials: ClientCredentials) -> Self {
        Self {
            http,
            token_endpoint,
            credentials,
        }
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse> {
        self.request_token(
            "authorization_code",
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ],
        )
        .await
    }

    /// Renew an access token using a refresh token.
    pub async fn refresh_token(&self, refresh: &str) -> Result<TokenResponse> {
        self.request_token(
            "refresh_token",
            &[("grant_type", "refresh_token"), ("refresh_token", refresh)],
        )
        .await
    }

    /// POST the grant form. Non-2xx responses come back as `Upstream` with the
    /// status and body untouched; there is no retry.
    async fn request_token(&self, grant_type: &str, form: &[(&str, &str)]) -> Result<TokenResponse> {
        debug!(grant_type, endpoint = %self.token_endpoint, "calling token endpoint");

        let response = self
            .http
            .post(&self.token_endpoint)
            .header(AUTHORIZATION, self.credentials.basic_authorization())
            .header(ACCEPT, "application/json")
            .header(USER_AGENT_HEADER, USER_AGENT)
            .form(form)
            .send()
            .await
            .map_err(|e| Error::Http(format!("token endpoint request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            warn!(grant_type, status = status.as_u16(), "token endpoint rejected grant");
            return Err(Error::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::InvalidResponse(format!("{grant_type} response: {e}")))?;
        token.log_received(grant_type);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Captured {
        authorization: Option<String>,
        form: Vec<(String, String)>,
    }

    /// Stub token endpoint that records the last request and answers with a
    /// fixed status and body.
    async fn start_token_server(
        status: StatusCode,
        body: &'static str,
    ) -> (String, Arc<Mutex<Captured>>) {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let seen = captured.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = Router::new().route(
            "/oauth/token",
            post(move |headers: HeaderMap, form: String| {
                let seen = seen.clone();
                async move {
                    let mut c = seen.lock().await;
                    c.authorization = headers
                        .get("authorization")
                        .map(|v| v.to_str().unwrap().to_string());
                    c.form = url::form_urlencoded::parse(form.as_bytes())
                        .into_owned()
                        .collect();
                    (status, [("content-type", "application/json")], body)
                }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/oauth/token"), captured)
    }

    fn client(endpoint: String) -> TokenClient {
        let credentials =
            ClientCredentials::new("client-abc".into(), Secret::new("s3cret".into())).unwrap();
        TokenClient::new(reqwest::Client::new(), endpoint, credentials)
    }

    #[test]
    fn token_response_keeps_unknown_fields() {
        let json = r#"{"access_token":"A","refresh_token":"R","expires_in":3600,"token_type":"Bearer","scope":"loop:*","id_token":"x"}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "A");
        assert_eq!(token.expires_in, Some(3600));
        assert_eq!(token.extra["id_token"], "x");

        let back = serde_json::to_value(&token).unwrap();
        assert_eq!(back["id_token"], "x");
        assert_eq!(back["scope"], "loop:*");
    }

    #[test]
    fn basic_authorization_encodes_id_and_secret() {
        let credentials =
            ClientCredentials::new("id".into(), Secret::new("secret".into())).unwrap();
        // base64("id:secret")
        assert_eq!(credentials.basic_authorization(), "Basic aWQ6c2VjcmV0");
    }

    #[test]
    fn blank_credentials_are_rejected() {
        assert!(matches!(
            ClientCredentials::new(" ".into(), Secret::new("s".into())),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            ClientCredentials::new("id".into(), Secret::new(String::new())),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let credentials =
            ClientCredentials::new("id".into(), Secret::new("do-not-print".into())).unwrap();
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("do-not-print"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn exchange_sends_basic_auth_and_form() {
        let (endpoint, captured) = start_token_server(
            StatusCode::OK,
            r#"{"access_token":"A","refresh_token":"R","expires_in":3600}"#,
        )
        .await;

        let token = client(endpoint)
            .exchange_code("auth-code-123", "http://localhost:3000/callback")
            .await
            .unwrap();
        assert_eq!(token.access_token, "A");
        assert_eq!(token.refresh_token.as_deref(), Some("R"));

        let c = captured.lock().await;
        assert_eq!(c.authorization.as_deref(), Some("Basic Y2xpZW50LWFiYzpzM2NyZXQ="));
        assert!(c.form.contains(&("grant_type".into(), "authorization_code".into())));
        assert!(c.form.contains(&("code".into(), "auth-code-123".into())));
        assert!(c.form.contains(&(
            "redirect_uri".into(),
            "http://localhost:3000/callback".into()
        )));
    }

    #[tokio::test]
    async fn refresh_sends_refresh_grant() {
        let (endpoint, captured) =
            start_token_server(StatusCode::OK, r#"{"access_token":"B","expires_in":60}"#).await;

        let token = client(endpoint).refresh_token("rt_1").await.unwrap();
        assert_eq!(token.access_token, "B");
        assert!(token.refresh_token.is_none());

        let c = captured.lock().await;
        assert!(c.form.contains(&("grant_type".into(), "refresh_token".into())));
        assert!(c.form.contains(&("refresh_token".into(), "rt_1".into())));
    }

    #[tokio::test]
    async fn non_success_is_returned_verbatim() {
        let (endpoint, _) =
            start_token_server(StatusCode::BAD_REQUEST, r#"{"error":"invalid_grant"}"#).await;

        let err = client(endpoint).refresh_token("rt_revoked").await.unwrap_err();
        match err {
            Error::Upstream { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, r#"{"error":"invalid_grant"}"#);
            }
            other => panic!("expected Upstream, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_http_error() {
        let err = client("http://127.0.0.1:1/oauth/token".into())
            .exchange_code("code", "http://localhost/cb")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http(_)), "got {err:?}");
    }
}
