//! Resource API relay
//!
//! `ANY /proxy/{*path}` forwards to `{api_url}/{path}` with the caller's bearer
//! token. Holds no secret; it exists so browser-style clients are not blocked
//! by cross-origin rules. Successful responses come back with the upstream
//! status and content type, binary bodies byte for byte. Upstream errors are
//! wrapped as `{error, status, details}` with the same status.

use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{
    ACCEPT, AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT,
};
use axum::http::{HeaderMap, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use common::BodyKind;
use tracing::{debug, error, instrument, warn};

use crate::error::{RelayError, details_from_body};
use crate::metrics;
use crate::oauth::new_request_id;
use crate::service::AppState;

/// Largest request body accepted for forwarding.
const BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Query parameter used internally to select the path; never forwarded.
const PATH_SELECTOR: &str = "path";

const DEFAULT_MEDIA_TYPE: &str = "application/json";

const ROUTE_PREFIX: &str = "/proxy/";

/// Handler for `ANY /proxy/{*path}`.
pub async fn forward(State(state): State<AppState>, request: Request) -> Response {
    let started = Instant::now();
    let _in_flight = state.metrics.begin_request();
    let method = request.method().clone();
    let request_id = new_request_id();
    let path = forwarded_path(request.uri().path()).to_string();

    let response = match relay(&state, &path, request, &request_id).await {
        Ok(response) => response,
        Err(e) => {
            state.metrics.record_error();
            e.into_response()
        }
    };
    metrics::record_request(
        "proxy",
        method.as_str(),
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %path))]
async fn relay(
    state: &AppState,
    path: &str,
    request: Request,
    request_id: &str,
) -> Result<Response, RelayError> {
    let authorization = bearer_header(request.headers())?;
    let url = upstream_url(&state.api_url, path, request.uri().query());
    let content_type = header_or_default(request.headers(), CONTENT_TYPE.as_str());
    let accept = header_or_default(request.headers(), ACCEPT.as_str());
    let method = request.method().clone();

    let body = axum::body::to_bytes(request.into_body(), BODY_LIMIT)
        .await
        .map_err(|e| RelayError::InvalidBody(e.to_string()))?;

    debug!(url = %url, "forwarding to resource API");
    let mut upstream = state
        .http
        .request(method.clone(), &url)
        .header(AUTHORIZATION, authorization)
        .header(CONTENT_TYPE, content_type)
        .header(ACCEPT, accept)
        .header(USER_AGENT, dotloop_auth::USER_AGENT);
    if method != Method::GET && method != Method::DELETE && !body.is_empty() {
        upstream = upstream.body(body);
    }

    let response = upstream.send().await.map_err(|e| {
        let label = if e.is_timeout() { "timeout" } else { "connection" };
        metrics::record_upstream_error(label);
        error!(error = %e, "resource API request failed");
        RelayError::Transport {
            error: "Failed to reach Dotloop API",
            details: e.to_string(),
        }
    })?;

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.bytes().await.map_err(|e| {
        metrics::record_upstream_error("body_read");
        RelayError::Transport {
            error: "Failed to read Dotloop API response",
            details: e.to_string(),
        }
    })?;

    if !status.is_success() {
        warn!(status = status.as_u16(), "resource API returned error");
        metrics::record_upstream_error("upstream_status");
        return Err(RelayError::Upstream {
            status: status.as_u16(),
            error: "Dotloop API error",
            details: details_from_body(&String::from_utf8_lossy(&bytes)),
        });
    }

    let upstream_type = headers.get(CONTENT_TYPE);
    let kind = BodyKind::from_content_type(upstream_type.and_then(|v| v.to_str().ok()));
    let mut builder = Response::builder().status(status);
    if let Some(value) = upstream_type {
        builder = builder.header(CONTENT_TYPE, value);
    }
    if kind.is_binary() {
        for name in [CONTENT_DISPOSITION, CONTENT_LENGTH] {
            if let Some(value) = headers.get(&name) {
                builder = builder.header(name, value);
            }
        }
    }
    debug!(status = status.as_u16(), ?kind, bytes = bytes.len(), "relaying response");

    builder
        .body(Body::from(bytes))
        .map_err(|e| RelayError::Transport {
            error: "Failed to build response",
            details: e.to_string(),
        })
}

/// The caller's `Authorization` value if it is a bearer token.
fn bearer_header(headers: &HeaderMap) -> Result<HeaderValue, RelayError> {
    match headers.get(AUTHORIZATION) {
        None => Err(RelayError::Unauthorized {
            received: "Missing",
        }),
        Some(value)
            if value
                .to_str()
                .is_ok_and(|v| v.len() > "Bearer ".len() && v.starts_with("Bearer ")) =>
        {
            Ok(value.clone())
        }
        Some(_) => Err(RelayError::Unauthorized {
            received: "Invalid format",
        }),
    }
}

fn header_or_default(headers: &HeaderMap, name: &str) -> HeaderValue {
    headers
        .get(name)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_MEDIA_TYPE))
}

/// The request path after `/proxy/`, still percent-encoded so an encoded
/// `/` stays inside its segment.
fn forwarded_path(uri_path: &str) -> &str {
    uri_path
        .strip_prefix(ROUTE_PREFIX)
        .unwrap_or_else(|| uri_path.trim_start_matches('/'))
}

/// `{api_url}/{path}` plus the caller's query minus the path selector.
/// Repeated keys keep their order.
fn upstream_url(api_url: &str, path: &str, query: Option<&str>) -> String {
    let mut url = format!(
        "{}/{}",
        api_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    if let Some(query) = query {
        let forwarded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(
                url::form_urlencoded::parse(query.as_bytes()).filter(|(k, _)| k != PATH_SELECTOR),
            )
            .finish();
        if !forwarded.is_empty() {
            url.push('?');
            url.push_str(&forwarded);
        }
    }
    url
}
