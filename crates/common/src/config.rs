//! Helpers shared by the binaries' config loaders

use crate::error::{Error, Result};

/// The variable's value, unless it is unset or blank.
pub fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Reject `value` unless it is an http(s) URL. `field` names the setting in the error.
pub fn require_http_url(field: &str, value: &str) -> Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{field} must start with http:// or https://, got: {value}"
        )))
    }
}
