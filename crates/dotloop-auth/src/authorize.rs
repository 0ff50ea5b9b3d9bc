//! Authorization redirect and callback handling
//!
//! Builds the authorization URL, generates the per-login `state` value, and
//! verifies the redirect callback against it. The state lives only in memory
//! for one round trip; a callback whose state does not match is rejected.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::settings::OAuthSettings;

/// Generate a fresh, unguessable state value.
///
/// 32 random bytes encoded as URL-safe base64 without padding (43 characters).
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Build the authorization URL.
///
/// Pure function of the settings and `state`: fixed `response_type=code`, the
/// configured client ID, redirect URI, and space-joined scopes, plus `state`
/// when provided.
pub fn build_authorization_url(settings: &OAuthSettings, state: Option<&str>) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query
        .append_pair("response_type", "code")
        .append_pair("client_id", &settings.client_id)
        .append_pair("redirect_uri", &settings.redirect_uri)
        .append_pair("scope", &settings.scope_string());
    if let Some(state) = state.filter(|s| !s.is_empty()) {
        query.append_pair("state", state);
    }
    format!("{}?{}", settings.authorization_endpoint(), query.finish())
}

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse a raw query string (without the leading `?`). Unknown keys are ignored.
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }
        params
    }
}

/// A login attempt waiting for its callback.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    state: String,
    url: String,
}

impl PendingAuthorization {
    /// Start a login attempt with a freshly generated state.
    pub fn begin(settings: &OAuthSettings) -> Self {
        let state = generate_state();
        let url = build_authorization_url(settings, Some(&state));
        debug!("authorization request prepared");
        Self { state, url }
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// URL the user agent should be sent to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Check the callback and return the authorization code.
    ///
    /// Order of checks: upstream `error`, missing state, state mismatch, missing code.
    pub fn verify(&self, callback: &CallbackParams) -> Result<String> {
        if let Some(error) = &callback.error {
            warn!(error = %error, "authorization server returned an error");
            return Err(Error::AuthorizationDenied {
                error: error.clone(),
                description: callback.error_description.clone(),
            });
        }

        let Some(state) = callback.state.as_deref().filter(|s| !s.is_empty()) else {
            warn!("callback without state parameter");
            return Err(Error::MissingState);
        };
        if !constant_time_eq(state.as_bytes(), self.state.as_bytes()) {
            warn!("callback state does not match pending authorization");
            return Err(Error::StateMismatch);
        }

        match callback.code.as_deref() {
            Some(code) if !code.is_empty() => Ok(code.to_string()),
            _ => Err(Error::MissingCode),
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings() -> OAuthSettings {
        OAuthSettings {
            auth_url: "https://auth.dotloop.com".into(),
            client_id: "client-abc".into(),
            redirect_uri: "http://localhost:3000/callback".into(),
            scopes: vec!["account:read".into(), "loop:*".into()],
        }
    }

    fn query_of(url: &str) -> HashMap<String, String> {
        let (_, query) = url.split_once('?').unwrap();
        url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect()
    }

    #[test]
    fn state_is_url_safe_and_unique() {
        let a = generate_state();
        let b = generate_state();
        assert_eq!(a.len(), 43);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "state must be URL-safe base64: {a}"
        );
        assert_ne!(a, b, "two states must not collide");
    }

    #[test]
    fn authorization_url_contains_required_params() {
        let url = build_authorization_url(&settings(), Some("xyz"));
        assert!(url.starts_with("https://auth.dotloop.com/oauth/authorize?"));

        let query = query_of(&url);
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "client-abc");
        assert_eq!(query["redirect_uri"], "http://localhost:3000/callback");
        assert_eq!(query["scope"], "account:read loop:*");
        assert_eq!(query["state"], "xyz");
    }

    #[test]
    fn authorization_url_omits_absent_state() {
        let url = build_authorization_url(&settings(), None);
        assert!(!query_of(&url).contains_key("state"));

        let url = build_authorization_url(&settings(), Some(""));
        assert!(!query_of(&url).contains_key("state"));
    }

    #[test]
    fn authorization_url_is_deterministic() {
        assert_eq!(
            build_authorization_url(&settings(), Some("s")),
            build_authorization_url(&settings(), Some("s"))
        );
    }

    #[test]
    fn callback_params_parse_query() {
        let params = CallbackParams::from_query("?code=abc%20def&state=s1&extra=1");
        assert_eq!(params.code.as_deref(), Some("abc def"));
        assert_eq!(params.state.as_deref(), Some("s1"));
        assert!(params.error.is_none());
    }

    #[test]
    fn pending_authorization_embeds_its_state() {
        let pending = PendingAuthorization::begin(&settings());
        assert_eq!(query_of(pending.url())["state"], pending.state());
    }

    #[test]
    fn verify_accepts_matching_state() {
        let pending = PendingAuthorization::begin(&settings());
        let callback = CallbackParams {
            code: Some("auth-code-123".into()),
            state: Some(pending.state().to_string()),
            ..Default::default()
        };
        assert_eq!(pending.verify(&callback).unwrap(), "auth-code-123");
    }

    #[test]
    fn verify_rejects_mismatched_state() {
        let pending = PendingAuthorization::begin(&settings());
        let callback = CallbackParams {
            code: Some("auth-code-123".into()),
            state: Some("forged".into()),
            ..Default::default()
        };
        assert!(matches!(pending.verify(&callback), Err(Error::StateMismatch)));
    }

    #[test]
    fn verify_rejects_missing_state() {
        let pending = PendingAuthorization::begin(&settings());
        let callback = CallbackParams {
            code: Some("auth-code-123".into()),
            ..Default::default()
        };
        assert!(matches!(pending.verify(&callback), Err(Error::MissingState)));
    }

    #[test]
    fn verify_surfaces_upstream_error_first() {
        let pending = PendingAuthorization::begin(&settings());
        let callback = CallbackParams::from_query("error=access_denied&error_description=nope");
        match pending.verify(&callback) {
            Err(Error::AuthorizationDenied { error, description }) => {
                assert_eq!(error, "access_denied");
                assert_eq!(description.as_deref(), Some("nope"));
            }
            other => panic!("expected AuthorizationDenied, got {other:?}"),
        }
    }

    #[test]
    fn verify_rejects_missing_code() {
        let pending = PendingAuthorization::begin(&settings());
        let callback = CallbackParams {
            state: Some(pending.state().to_string()),
            code: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(pending.verify(&callback), Err(Error::MissingCode)));
    }

    #[test]
    fn constant_time_eq_behaves_like_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
