//! Secret-hiding token endpoints
//!
//! `POST /oauth/token` exchanges an authorization code and `POST /oauth/refresh`
//! renews an access token. Both add the client secret server side via
//! `TokenClient` and return the upstream token JSON unchanged. Checks run in
//! a fixed order: body shape, required parameter, then server configuration.

use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dotloop_auth::{ExchangeRequest, RefreshRequest, TokenResponse};
use serde::de::DeserializeOwned;
use tracing::{error, info, instrument, warn};

use crate::error::{RelayError, details_from_body};
use crate::metrics;
use crate::service::AppState;

/// Handler for `POST /oauth/token`.
pub async fn exchange_token(State(state): State<AppState>, body: Bytes) -> Response {
    let started = Instant::now();
    let _in_flight = state.metrics.begin_request();
    let request_id = new_request_id();
    let result = exchange(&state, &body, &request_id).await;
    respond(&state, "oauth_token", "authorization_code", started, result)
}

/// Handler for `POST /oauth/refresh`.
pub async fn refresh_token(State(state): State<AppState>, body: Bytes) -> Response {
    let started = Instant::now();
    let _in_flight = state.metrics.begin_request();
    let request_id = new_request_id();
    let result = refresh(&state, &body, &request_id).await;
    respond(&state, "oauth_refresh", "refresh_token", started, result)
}

/// Any method other than POST on the token routes.
pub async fn method_not_allowed() -> Response {
    RelayError::MethodNotAllowed.into_response()
}

#[instrument(skip_all, fields(request_id = %request_id, grant_type = "authorization_code"))]
async fn exchange(
    state: &AppState,
    body: &[u8],
    request_id: &str,
) -> Result<TokenResponse, RelayError> {
    let request: ExchangeRequest = parse_body(body)?;
    let code = request
        .code
        .filter(|c| !c.is_empty())
        .ok_or(RelayError::MissingParameter {
            message: "Missing authorization code",
            required: "code",
        })?;
    let client = configured_client(state)?;
    let redirect_uri = request
        .redirect_uri
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| state.oauth.redirect_uri.clone());

    info!(
        has_state = request.state.is_some(),
        redirect_uri = %redirect_uri,
        "exchanging authorization code"
    );
    client
        .exchange_code(&code, &redirect_uri)
        .await
        .map_err(|e| grant_failure("Token exchange failed", e))
}

#[instrument(skip_all, fields(request_id = %request_id, grant_type = "refresh_token"))]
async fn refresh(
    state: &AppState,
    body: &[u8],
    request_id: &str,
) -> Result<TokenResponse, RelayError> {
    let request: RefreshRequest = parse_body(body)?;
    let refresh_token = request
        .refresh_token
        .filter(|t| !t.is_empty())
        .ok_or(RelayError::MissingParameter {
            message: "Missing refresh token",
            required: "refresh_token",
        })?;
    let client = configured_client(state)?;

    info!("refreshing access token");
    client
        .refresh_token(&refresh_token)
        .await
        .map_err(|e| grant_failure("Token refresh failed", e))
}

fn configured_client(state: &AppState) -> Result<&dotloop_auth::TokenClient, RelayError> {
    state.token_client.as_ref().ok_or_else(|| {
        error!(
            client_id_configured = state.credentials.client_id,
            client_secret_configured = state.credentials.client_secret,
            "client credentials are not configured"
        );
        RelayError::ServerConfiguration
    })
}

/// An empty body reads as `{}` so the missing-parameter check reports it.
fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, RelayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| RelayError::InvalidBody(e.to_string()))
}

fn grant_failure(error: &'static str, err: dotloop_auth::Error) -> RelayError {
    match err {
        dotloop_auth::Error::Upstream { status, body } => {
            warn!(status, "authorization server rejected grant");
            RelayError::Upstream {
                status,
                error,
                details: details_from_body(&body),
            }
        }
        other => {
            let label = match other {
                dotloop_auth::Error::InvalidResponse(_) => "invalid_response",
                _ => "connection",
            };
            metrics::record_upstream_error(label);
            error!(error = %other, "token endpoint call failed");
            RelayError::Transport {
                error,
                details: other.to_string(),
            }
        }
    }
}

fn respond(
    state: &AppState,
    route: &'static str,
    grant_type: &'static str,
    started: Instant,
    result: Result<TokenResponse, RelayError>,
) -> Response {
    let response = match result {
        Ok(token) => {
            metrics::record_token_grant(grant_type, "success");
            (StatusCode::OK, Json(token)).into_response()
        }
        Err(e) => {
            metrics::record_token_grant(grant_type, "failure");
            state.metrics.record_error();
            e.into_response()
        }
    };
    metrics::record_request(
        route,
        "POST",
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

pub(crate) fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}
