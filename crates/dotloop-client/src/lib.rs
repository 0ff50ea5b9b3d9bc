//! Authenticated access to the Dotloop resource API
//!
//! `ApiRelay` attaches the bearer token held by a `TokenManager`, refreshes it
//! before sending when it has expired, and retries exactly once after a 401.
//! `DotloopApi` builds the per-resource paths on top of the relay and decodes
//! responses into canonical models.

pub mod api;
pub mod body;
pub mod error;
pub mod models;
pub mod relay;

pub use api::{DotloopApi, Download, LoopQuery};
pub use body::{BinaryBody, ResponseBody};
pub use error::{Error, Result};
pub use models::{Account, Document, Folder, Loop, Profile};
pub use relay::{ApiRelay, ApiRequest, ApiResponse, RequestBody};
