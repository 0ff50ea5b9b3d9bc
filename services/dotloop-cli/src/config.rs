//! CLI configuration
//!
//! Every field has a default, so the file is optional unless a path is given
//! explicitly. The client secret never appears here; the CLI only knows the
//! relay that holds it.

use common::{non_empty_env, require_http_url};
use dotloop_auth::{OAuthSettings, STORAGE_KEY};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "dotloop-cli.toml";

/// Where the relay (`dotloop-proxy`) listens by default.
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:3000";

/// Where `login` listens for the browser by default. Must not share the
/// relay's host and port.
pub const DEFAULT_CALLBACK_URI: &str = "http://127.0.0.1:8400/callback";

/// Root configuration
#[derive(Debug)]
pub struct Config {
    pub dotloop: OAuthSettings,
    pub client: ClientConfig,
}

impl Default for Config {
    fn default() -> Self {
        FileConfig::default().into()
    }
}

/// The file as written. `redirect_uri` falls back to the CLI's own callback
/// listener rather than the shared settings default.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    dotloop: DotloopSection,
    #[serde(default)]
    client: ClientConfig,
}

#[derive(Debug, Default, Deserialize)]
struct DotloopSection {
    redirect_uri: Option<String>,
    #[serde(flatten)]
    settings: OAuthSettings,
}

impl From<FileConfig> for Config {
    fn from(file: FileConfig) -> Self {
        let mut dotloop = file.dotloop.settings;
        dotloop.redirect_uri = file
            .dotloop
            .redirect_uri
            .unwrap_or_else(|| DEFAULT_CALLBACK_URI.to_string());
        Config {
            dotloop,
            client: file.client,
        }
    }
}

/// Relay location and local credential storage
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            credentials_path: None,
        }
    }
}

fn default_relay_url() -> String {
    DEFAULT_RELAY_URL.to_string()
}

/// A config path and whether the user asked for it explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub explicit: bool,
}

impl Config {
    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&Path>) -> ConfigSource {
        if let Some(p) = cli_path {
            return ConfigSource {
                path: p.to_path_buf(),
                explicit: true,
            };
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return ConfigSource {
                path: PathBuf::from(p),
                explicit: true,
            };
        }
        ConfigSource {
            path: PathBuf::from(DEFAULT_CONFIG_FILE),
            explicit: false,
        }
    }

    /// Load the file (if any), then overlay environment variables.
    ///
    /// A missing file at the default location yields the defaults; a missing
    /// file that was named explicitly is an error.
    pub fn load(source: &ConfigSource) -> common::Result<Self> {
        let mut config: Config = match std::fs::read_to_string(&source.path) {
            Ok(contents) => toml::from_str::<FileConfig>(&contents)?.into(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !source.explicit => {
                Config::default()
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(id) = non_empty_env("DOTLOOP_CLIENT_ID") {
            config.dotloop.client_id = id;
        }
        if let Some(url) = non_empty_env("DOTLOOP_AUTH_URL") {
            config.dotloop.auth_url = url;
        }
        if let Some(uri) = non_empty_env("DOTLOOP_REDIRECT_URI") {
            config.dotloop.redirect_uri = uri;
        }
        if let Some(url) = non_empty_env("DOTLOOP_RELAY_URL") {
            config.client.relay_url = url;
        }

        require_http_url("auth_url", &config.dotloop.auth_url)?;
        require_http_url("redirect_uri", &config.dotloop.redirect_uri)?;
        require_http_url("relay_url", &config.client.relay_url)?;
        if same_socket(&config.dotloop.redirect_uri, &config.client.relay_url) {
            return Err(common::Error::Config(format!(
                "redirect_uri {} uses the same host and port as relay_url {}; \
                 the login callback listener needs its own port",
                config.dotloop.redirect_uri, config.client.relay_url
            )));
        }

        if config.dotloop.scopes.is_empty() {
            return Err(common::Error::Config("scopes must not be empty".into()));
        }

        Ok(config)
    }

    /// Configured credentials file, else `<config dir>/dotloop/dotloop_tokens.json`.
    pub fn credentials_path(&self) -> PathBuf {
        if let Some(path) = &self.client.credentials_path {
            return path.clone();
        }
        let file = format!("{STORAGE_KEY}.json");
        match dirs::config_dir() {
            Some(dir) => dir.join("dotloop").join(file),
            None => PathBuf::from(file),
        }
    }

    /// Prefix under which the relay forwards resource API calls.
    pub fn resource_base_url(&self) -> String {
        format!("{}/proxy", self.client.relay_url.trim_end_matches('/'))
    }
}

/// Whether two URLs resolve to the same listening socket. `localhost` and
/// `127.0.0.1` are treated as one host.
fn same_socket(a: &str, b: &str) -> bool {
    fn socket(value: &str) -> Option<(String, u16)> {
        let url = url::Url::parse(value).ok()?;
        let host = match url.host_str()? {
            "localhost" => "127.0.0.1".to_string(),
            host => host.to_ascii_lowercase(),
        };
        Some((host, url.port_or_known_default()?))
    }
    matches!((socket(a), socket(b)), (Some(a), Some(b)) if a == b)
}
