//! Response body classification by content type
//!
//! The relay boundary and the client relay must agree on which payloads are
//! parsed as JSON, which are passed through as untouched bytes, and which are
//! treated as plain text. Both sides call [`BodyKind::from_content_type`].

/// Content-type fragments that mark a body as binary.
const BINARY_MARKERS: &[&str] = &[
    "application/pdf",
    "application/octet-stream",
    "image/",
    "application/zip",
    "application/msword",
    "application/vnd.",
];

/// How a response body should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Binary,
    Text,
}

impl BodyKind {
    /// Classify a `Content-Type` header value. Matching is case-insensitive
    /// and ignores parameters such as `charset`.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return BodyKind::Text;
        };
        let lowered = content_type.to_ascii_lowercase();

        if lowered.contains("application/json") || lowered.contains("+json") {
            BodyKind::Json
        } else if BINARY_MARKERS.iter().any(|m| lowered.contains(m)) {
            BodyKind::Binary
        } else {
            BodyKind::Text
        }
    }

    pub fn is_binary(self) -> bool {
        self == BodyKind::Binary
    }
}
