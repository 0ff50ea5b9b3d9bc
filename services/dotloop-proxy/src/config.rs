//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client secret is loaded from DOTLOOP_CLIENT_SECRET or client_secret_file,
//! never stored in the TOML directly to avoid leaking secrets.

use common::{Secret, non_empty_env, require_http_url};
use dotloop_auth::{ClientCredentials, DEFAULT_API_URL, OAuthSettings};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub dotloop: DotloopConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Upstream request timeout. Absent means the transport default.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// OAuth client and upstream API settings
#[derive(Debug, Deserialize)]
pub struct DotloopConfig {
    #[serde(flatten)]
    pub oauth: OAuthSettings,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Path to a file containing the client secret (alternative to DOTLOOP_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
}

impl Default for DotloopConfig {
    fn default() -> Self {
        Self {
            oauth: OAuthSettings::default(),
            api_url: default_api_url(),
            client_secret_file: None,
            client_secret: None,
        }
    }
}

fn default_max_connections() -> usize {
    1000
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. DOTLOOP_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    ///
    /// A missing client ID or secret is not an error here; the token handlers
    /// report it per request.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Some(id) = non_empty_env("DOTLOOP_CLIENT_ID") {
            config.dotloop.oauth.client_id = id;
        }
        if let Some(url) = non_empty_env("DOTLOOP_AUTH_URL") {
            config.dotloop.oauth.auth_url = url;
        }
        if let Some(url) = non_empty_env("DOTLOOP_API_URL") {
            config.dotloop.api_url = url;
        }
        if let Some(uri) = non_empty_env("DOTLOOP_REDIRECT_URI") {
            config.dotloop.oauth.redirect_uri = uri;
        }

        require_http_url("auth_url", &config.dotloop.oauth.auth_url)?;
        require_http_url("api_url", &config.dotloop.api_url)?;
        require_http_url("redirect_uri", &config.dotloop.oauth.redirect_uri)?;

        if config.server.timeout_secs == Some(0) {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        // Resolve client secret: env var takes precedence over file
        if let Some(secret) = non_empty_env("DOTLOOP_CLIENT_SECRET") {
            config.dotloop.client_secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.dotloop.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.dotloop.client_secret = Some(Secret::new(secret));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("dotloop-proxy.toml")
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.server.timeout_secs.map(Duration::from_secs)
    }
}

impl DotloopConfig {
    pub fn client_id_configured(&self) -> bool {
        !self.oauth.client_id.trim().is_empty()
    }

    pub fn client_secret_configured(&self) -> bool {
        self.client_secret.as_ref().is_some_and(|s| !s.is_blank())
    }

    /// Both halves of the client credentials, or `None` if either is missing.
    pub fn client_credentials(&self) -> Option<ClientCredentials> {
        let secret = self.client_secret.clone()?;
        ClientCredentials::new(self.oauth.client_id.clone(), secret).ok()
    }
}
