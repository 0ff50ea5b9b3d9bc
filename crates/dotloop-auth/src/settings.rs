//! Static OAuth client settings
//!
//! One authorization server, one client ID, one redirect URI and one scope set,
//! all fixed at startup. Both binaries deserialize this from their `[dotloop]`
//! config section.

use serde::Deserialize;

use crate::constants::{
    AUTHORIZE_PATH, DEFAULT_AUTH_URL, DEFAULT_REDIRECT_URI, DEFAULT_SCOPES, TOKEN_PATH,
};

/// Public OAuth client configuration. Contains no secrets.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct OAuthSettings {
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.to_string()
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_string()
}

fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            auth_url: default_auth_url(),
            client_id: String::new(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
        }
    }
}

impl OAuthSettings {
    /// `{auth_url}/oauth/authorize`
    pub fn authorization_endpoint(&self) -> String {
        format!("{}{AUTHORIZE_PATH}", self.auth_url.trim_end_matches('/'))
    }

    /// `{auth_url}/oauth/token`
    pub fn token_endpoint(&self) -> String {
        format!("{}{TOKEN_PATH}", self.auth_url.trim_end_matches('/'))
    }

    /// Scopes joined with single spaces, as sent in the `scope` parameter.
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}
