//! Common types shared by the Dotloop relay and client crates

mod body;
mod config;
mod error;
mod secret;

pub use body::BodyKind;
pub use config::{non_empty_env, require_http_url};
pub use error::{Error, Result};
pub use secret::Secret;
