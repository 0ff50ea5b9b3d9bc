//! Relay error responses
//!
//! Every failure a handler can produce, with its HTTP mapping. Bodies are
//! JSON and never contain secrets or tokens.

use axum::http::header::{ALLOW, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// A required body parameter is absent.
    #[error("{message}")]
    MissingParameter {
        message: &'static str,
        required: &'static str,
    },

    /// Client ID or secret is not configured on this deployment.
    #[error("Server configuration error - missing credentials")]
    ServerConfiguration,

    /// `/proxy` request without a usable bearer token.
    #[error("Authorization header required")]
    Unauthorized { received: &'static str },

    /// Non-2xx from an upstream server, relayed with the same status.
    #[error("{error} ({status})")]
    Upstream {
        status: u16,
        error: &'static str,
        details: serde_json::Value,
    },

    /// Upstream could not be reached.
    #[error("{error}: {details}")]
    Transport { error: &'static str, details: String },

    #[error("Invalid request body: {0}")]
    InvalidBody(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            RelayError::MissingParameter { .. } | RelayError::InvalidBody(_) => {
                StatusCode::BAD_REQUEST
            }
            RelayError::ServerConfiguration => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            RelayError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            RelayError::Transport { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    fn body(&self) -> serde_json::Value {
        match self {
            RelayError::MethodNotAllowed => json!({
                "error": self.to_string(),
                "allowed": ["POST"],
            }),
            RelayError::MissingParameter { message, required } => json!({
                "error": message,
                "required": [required],
            }),
            RelayError::ServerConfiguration => json!({ "error": self.to_string() }),
            RelayError::Unauthorized { received } => json!({
                "error": self.to_string(),
                "expected": "Bearer <token>",
                "received": received,
            }),
            RelayError::Upstream {
                status,
                error,
                details,
            } => json!({
                "error": error,
                "status": status,
                "details": details,
            }),
            RelayError::Transport { error, details } => json!({
                "error": error,
                "details": details,
            }),
            RelayError::InvalidBody(message) => json!({
                "error": "Invalid request body",
                "details": message,
            }),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (
            status,
            [(CONTENT_TYPE, "application/json")],
            self.body().to_string(),
        )
            .into_response();
        if matches!(self, RelayError::MethodNotAllowed) {
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("POST"));
        }
        response
    }
}

/// Upstream error body as JSON when it parses, otherwise as a string.
pub fn details_from_body(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap_or_else(|_| serde_json::Value::String(body.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn render(err: RelayError) -> (StatusCode, serde_json::Value, Option<String>) {
        let response = err.into_response();
        let status = response.status();
        let allow = response
            .headers()
            .get(ALLOW)
            .map(|v| v.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap(), allow)
    }

    #[tokio::test]
    async fn method_not_allowed_lists_post() {
        let (status, body, allow) = render(RelayError::MethodNotAllowed).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["allowed"], json!(["POST"]));
        assert_eq!(allow.as_deref(), Some("POST"));
    }

    #[tokio::test]
    async fn missing_parameter_names_the_field() {
        let (status, body, _) = render(RelayError::MissingParameter {
            message: "Missing authorization code",
            required: "code",
        })
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing authorization code");
        assert_eq!(body["required"], json!(["code"]));
    }

    #[tokio::test]
    async fn server_configuration_is_500() {
        let (status, body, _) = render(RelayError::ServerConfiguration).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["error"],
            "Server configuration error - missing credentials"
        );
    }

    #[tokio::test]
    async fn upstream_keeps_status_and_details() {
        let (status, body, _) = render(RelayError::Upstream {
            status: 400,
            error: "Token exchange failed",
            details: details_from_body(r#"{"error":"invalid_grant"}"#),
        })
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Token exchange failed");
        assert_eq!(body["status"], 400);
        assert_eq!(body["details"]["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn transport_is_bad_gateway() {
        let (status, body, _) = render(RelayError::Transport {
            error: "Failed to reach Dotloop API",
            details: "connection refused".into(),
        })
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["details"], "connection refused");
    }

    #[test]
    fn details_fall_back_to_text() {
        assert_eq!(details_from_body("plain failure"), json!("plain failure"));
    }
}
