//! Response body decoding
//!
//! Interprets a response by its declared content type: JSON is parsed, binary
//! payloads (PDF, images, archives, office formats) are kept as untouched
//! bytes together with the headers needed to save them, anything else is text.

use bytes::Bytes;
use common::BodyKind;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};
use tracing::debug;

/// Binary payload plus the headers that describe it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryBody {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub content_length: Option<u64>,
}

/// A decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(serde_json::Value),
    Binary(BinaryBody),
    Text(String),
}

impl ResponseBody {
    /// Decode `bytes` according to the `Content-Type` in `headers`.
    ///
    /// A body labelled JSON that fails to parse falls back to text rather than
    /// failing the whole request.
    pub fn decode(headers: &HeaderMap, bytes: Bytes) -> Self {
        let content_type = header_str(headers, CONTENT_TYPE.as_str());
        match BodyKind::from_content_type(content_type.as_deref()) {
            BodyKind::Json => match serde_json::from_slice(&bytes) {
                Ok(value) => ResponseBody::Json(value),
                Err(e) => {
                    debug!(error = %e, "JSON body did not parse, keeping as text");
                    ResponseBody::Text(String::from_utf8_lossy(&bytes).into_owned())
                }
            },
            BodyKind::Binary => ResponseBody::Binary(BinaryBody {
                content_disposition: header_str(headers, CONTENT_DISPOSITION.as_str()),
                content_length: header_str(headers, CONTENT_LENGTH.as_str())
                    .and_then(|v| v.parse().ok()),
                content_type,
                bytes,
            }),
            BodyKind::Text => ResponseBody::Text(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&BinaryBody> {
        match self {
            ResponseBody::Binary(body) => Some(body),
            _ => None,
        }
    }

    /// Body rendered as a string, for error messages.
    pub fn to_text(&self) -> String {
        match self {
            ResponseBody::Json(value) => value.to_string(),
            ResponseBody::Binary(body) => String::from_utf8_lossy(&body.bytes).into_owned(),
            ResponseBody::Text(text) => text.clone(),
        }
    }

    /// Raw bytes of the body.
    pub fn into_bytes(self) -> Bytes {
        match self {
            ResponseBody::Json(value) => Bytes::from(value.to_string()),
            ResponseBody::Binary(body) => body.bytes,
            ResponseBody::Text(text) => Bytes::from(text),
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
