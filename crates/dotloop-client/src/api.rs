//! Resource API facade
//!
//! Thin per-endpoint helpers over `ApiRelay`. Each method builds a path and
//! query string, delegates, and decodes the `{"data": ...}` envelope into the
//! canonical models. Non-2xx responses become `Error::Api`.

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::body::ResponseBody;
use crate::error::{Error, Result};
use crate::models::{Account, Document, Folder, Loop, Payload, Profile};
use crate::relay::{ApiRelay, ApiRequest, ApiResponse};

/// Listing options for `DotloopApi::loops`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopQuery {
    pub batch_number: Option<u32>,
    pub batch_size: Option<u32>,
    pub sort: Option<String>,
    pub filter: Option<String>,
    pub include_details: bool,
}

impl LoopQuery {
    fn to_query_string(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        if let Some(n) = self.batch_number {
            query.append_pair("batch_number", &n.to_string());
        }
        if let Some(n) = self.batch_size {
            query.append_pair("batch_size", &n.to_string());
        }
        if let Some(sort) = &self.sort {
            query.append_pair("sort", sort);
        }
        if let Some(filter) = &self.filter {
            query.append_pair("filter", filter);
        }
        if self.include_details {
            query.append_pair("include_details", "true");
        }
        query.finish()
    }
}

/// A downloaded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    /// From `Content-Disposition`, when the server supplied one.
    pub file_name: Option<String>,
}

pub struct DotloopApi {
    relay: ApiRelay,
}

impl DotloopApi {
    pub fn new(relay: ApiRelay) -> Self {
        Self { relay }
    }

    pub fn relay(&self) -> &ApiRelay {
        &self.relay
    }

    pub async fn account(&self) -> Result<Account> {
        self.get_data("/account").await
    }

    pub async fn profiles(&self) -> Result<Vec<Profile>> {
        self.get_data("/profile").await
    }

    pub async fn profile(&self, profile_id: &str) -> Result<Profile> {
        require_ids(&[("profile_id", profile_id)])?;
        self.get_data(&format!("/profile/{profile_id}")).await
    }

    pub async fn loops(&self, profile_id: &str, query: &LoopQuery) -> Result<Vec<Loop>> {
        require_ids(&[("profile_id", profile_id)])?;
        let endpoint = with_query(format!("/profile/{profile_id}/loop"), query.to_query_string());
        self.get_data(&endpoint).await
    }

    pub async fn loop_summary(&self, profile_id: &str, loop_id: &str) -> Result<Loop> {
        require_ids(&[("profile_id", profile_id), ("loop_id", loop_id)])?;
        self.get_data(&format!("/profile/{profile_id}/loop/{loop_id}"))
            .await
    }

    /// Loop detail sections vary by transaction type, so they stay untyped.
    pub async fn loop_details(&self, profile_id: &str, loop_id: &str) -> Result<serde_json::Value> {
        require_ids(&[("profile_id", profile_id), ("loop_id", loop_id)])?;
        self.get_data(&format!("/profile/{profile_id}/loop/{loop_id}/detail"))
            .await
    }

    pub async fn folders(
        &self,
        profile_id: &str,
        loop_id: &str,
        include_documents: bool,
    ) -> Result<Vec<Folder>> {
        require_ids(&[("profile_id", profile_id), ("loop_id", loop_id)])?;
        let base = format!("/profile/{profile_id}/loop/{loop_id}/folder");
        let endpoint = if include_documents {
            format!("{base}?include_documents=true")
        } else {
            base
        };
        self.get_data(&endpoint).await
    }

    pub async fn folder(&self, profile_id: &str, loop_id: &str, folder_id: &str) -> Result<Folder> {
        require_ids(&[
            ("profile_id", profile_id),
            ("loop_id", loop_id),
            ("folder_id", folder_id),
        ])?;
        self.get_data(&format!(
            "/profile/{profile_id}/loop/{loop_id}/folder/{folder_id}"
        ))
        .await
    }

    pub async fn documents(
        &self,
        profile_id: &str,
        loop_id: &str,
        folder_id: &str,
    ) -> Result<Vec<Document>> {
        require_ids(&[
            ("profile_id", profile_id),
            ("loop_id", loop_id),
            ("folder_id", folder_id),
        ])?;
        self.get_data(&format!(
            "/profile/{profile_id}/loop/{loop_id}/folder/{folder_id}/document"
        ))
        .await
    }

    pub async fn document(
        &self,
        profile_id: &str,
        loop_id: &str,
        folder_id: &str,
        document_id: &str,
    ) -> Result<Document> {
        require_ids(&[
            ("profile_id", profile_id),
            ("loop_id", loop_id),
            ("folder_id", folder_id),
            ("document_id", document_id),
        ])?;
        self.get_data(&format!(
            "/profile/{profile_id}/loop/{loop_id}/folder/{folder_id}/document/{document_id}"
        ))
        .await
    }

    /// Download a document's file.
    ///
    /// A 404 on the folder path is retried once at the folder-less path; if
    /// that also fails, the original 404 is returned.
    pub async fn download_document(
        &self,
        profile_id: &str,
        loop_id: &str,
        folder_id: &str,
        document_id: &str,
    ) -> Result<Download> {
        require_ids(&[
            ("profile_id", profile_id),
            ("loop_id", loop_id),
            ("folder_id", folder_id),
            ("document_id", document_id),
        ])?;

        let primary = format!(
            "/profile/{profile_id}/loop/{loop_id}/folder/{folder_id}/document/{document_id}"
        );
        let response = self.download_request(&primary).await?;
        if response.is_success() {
            return Ok(into_download(response));
        }
        if response.status != StatusCode::NOT_FOUND {
            return Err(api_error(response));
        }

        let alternative = format!("/profile/{profile_id}/loop/{loop_id}/document/{document_id}");
        info!(endpoint = %alternative, "document not found in folder, trying loop-level path");
        match self.download_request(&alternative).await {
            Ok(alt) if alt.is_success() => Ok(into_download(alt)),
            Ok(alt) => {
                warn!(status = alt.status.as_u16(), "loop-level document path also failed");
                Err(api_error(response))
            }
            Err(e) => {
                warn!(error = %e, "loop-level document request failed");
                Err(api_error(response))
            }
        }
    }

    pub async fn contacts(&self) -> Result<Vec<serde_json::Value>> {
        self.get_data("/contact").await
    }

    pub async fn templates(&self, profile_id: &str) -> Result<Vec<serde_json::Value>> {
        require_ids(&[("profile_id", profile_id)])?;
        self.get_data(&format!("/profile/{profile_id}/loop-template"))
            .await
    }

    async fn download_request(&self, endpoint: &str) -> Result<ApiResponse> {
        let request =
            ApiRequest::get(endpoint).header(ACCEPT, HeaderValue::from_static("application/pdf"));
        self.relay.request(&request).await
    }

    async fn get_data<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let response = self.relay.request(&ApiRequest::get(endpoint)).await?;
        if !response.is_success() {
            return Err(api_error(response));
        }
        let ResponseBody::Json(value) = response.body else {
            return Err(Error::Decode(format!(
                "{endpoint}: expected a JSON body, got {}",
                response
                    .headers
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("no content type")
            )));
        };
        let payload: Payload<T> = serde_json::from_value(value)
            .map_err(|e| Error::Decode(format!("{endpoint}: {e}")))?;
        debug!(endpoint, "decoded response");
        Ok(payload.into_inner())
    }
}

fn require_ids(ids: &[(&str, &str)]) -> Result<()> {
    match ids.iter().find(|(_, value)| value.trim().is_empty()) {
        Some((name, _)) => Err(Error::InvalidRequest(format!("{name} is required"))),
        None => Ok(()),
    }
}

fn with_query(path: String, query: String) -> String {
    if query.is_empty() {
        path
    } else {
        format!("{path}?{query}")
    }
}

fn api_error(response: ApiResponse) -> Error {
    Error::Api {
        status: response.status.as_u16(),
        body: response.body.to_text(),
    }
}

fn into_download(response: ApiResponse) -> Download {
    let header = |name: &str| response.header(name).map(str::to_string);
    let content_type = header("content-type");
    let content_disposition = header("content-disposition");
    let file_name = content_disposition.as_deref().and_then(file_name_from_disposition);
    Download {
        bytes: response.body.into_bytes(),
        content_type,
        content_disposition,
        file_name,
    }
}

/// Extract `filename` from a `Content-Disposition` value.
fn file_name_from_disposition(value: &str) -> Option<String> {
    value.split(';').map(str::trim).find_map(|part| {
        let (key, name) = part.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let name = name.trim().trim_matches('"');
        (!name.is_empty()).then(|| name.to_string())
    })
}
