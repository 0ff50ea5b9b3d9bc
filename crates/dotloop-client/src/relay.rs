//! Authenticated request relay
//!
//! Per call: PREFLIGHT (refresh if the token has expired) -> SENDING ->
//! [401 -> REFRESHING -> RETRYING] -> DONE. There is never more than one retry,
//! and any status other than 401 is handed back to the caller unchanged.

use std::sync::Arc;

use bytes::Bytes;
use dotloop_auth::TokenManager;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use tracing::{debug, info, instrument};

use crate::body::ResponseBody;
use crate::error::{Error, Result};

/// Request payload. Only sent for methods other than GET and DELETE.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Bytes(Bytes),
}

/// One outbound call: endpoint (path plus optional query), method, extra
/// headers and body. Lives for the call and its single retry.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub endpoint: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
}

impl ApiRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(value));
        self
    }

    pub fn bytes(mut self, data: impl Into<Bytes>) -> Self {
        self.body = Some(RequestBody::Bytes(data.into()));
        self
    }

    fn sends_body(&self) -> bool {
        self.method != Method::GET && self.method != Method::DELETE
    }
}

/// Response as seen by the caller. Success and failure are told apart by `status`.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Sends resource API requests with the manager's bearer token.
pub struct ApiRelay {
    http: reqwest::Client,
    base_url: String,
    manager: Arc<TokenManager>,
}

impl ApiRelay {
    /// `base_url` is the resource relay prefix (e.g. `http://127.0.0.1:3000/proxy`)
    /// or the resource API base itself.
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, manager: Arc<TokenManager>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            manager,
        }
    }

    pub fn manager(&self) -> &Arc<TokenManager> {
        &self.manager
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send `request`, refreshing and retrying exactly once on a 401.
    #[instrument(skip_all, fields(method = %request.method, endpoint = %request.endpoint))]
    pub async fn request(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let token = self.preflight().await?;
        let response = self.send(request, &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::finish(response).await;
        }

        info!("resource API returned 401, refreshing token and retrying once");
        let record = self.manager.refresh().await?;
        let retry = self.send(request, &record.access_token).await?;
        debug!(status = retry.status().as_u16(), "retry completed");
        Self::finish(retry).await
    }

    /// Produce a usable access token, refreshing first if it has expired.
    async fn preflight(&self) -> Result<String> {
        if !self.manager.is_valid().await {
            if !self.manager.has_refresh_token().await {
                return Err(Error::AuthenticationRequired);
            }
            debug!("access token expired, refreshing before request");
            let record = self.manager.refresh().await?;
            return Ok(record.access_token);
        }
        self.manager
            .access_token()
            .await
            .ok_or(Error::AuthenticationRequired)
    }

    async fn send(&self, request: &ApiRequest, token: &str) -> Result<reqwest::Response> {
        let url = format!(
            "{}/{}",
            self.base_url,
            request.endpoint.trim_start_matches('/')
        );

        let mut headers = request.headers.clone();
        headers.remove(AUTHORIZATION);
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::InvalidRequest(format!("access token is not a valid header value: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .headers(headers);
        if request.sends_body() {
            builder = match &request.body {
                Some(RequestBody::Json(value)) => builder.json(value),
                Some(RequestBody::Bytes(data)) => builder.body(data.clone()),
                None => builder,
            };
        }

        builder
            .send()
            .await
            .map_err(|e| Error::Transport(format!("request to {url} failed: {e}")))
    }

    async fn finish(response: reqwest::Response) -> Result<ApiResponse> {
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("failed to read response body: {e}")))?;
        Ok(ApiResponse {
            status,
            body: ResponseBody::decode(&headers, bytes),
            headers,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::Request;
    use dotloop_auth::{
        CredentialRecord, CredentialStore, MemoryCredentialStore, OAuthSettings, TokenEndpoint,
        TokenResponse, now_millis,
    };
    use reqwest::header::{ACCEPT, CONTENT_TYPE};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    /// Token endpoint fake: every refresh hands out the next queued access token.
    pub(crate) struct FakeTokens {
        pub refresh_calls: AtomicUsize,
        tokens: Mutex<Vec<&'static str>>,
    }

    impl FakeTokens {
        pub(crate) fn issuing(tokens: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                refresh_calls: AtomicUsize::new(0),
                tokens: Mutex::new(tokens),
            })
        }
    }

    impl TokenEndpoint for FakeTokens {
        fn exchange<'a>(
            &'a self,
            _code: &'a str,
            _state: Option<&'a str>,
            _redirect_uri: Option<&'a str>,
        ) -> Pin<Box<dyn Future<Output = dotloop_auth::Result<TokenResponse>> + Send + 'a>> {
            Box::pin(async { Err(dotloop_auth::Error::Http("not scripted".into())) })
        }

        fn refresh<'a>(
            &'a self,
            _refresh_token: &'a str,
        ) -> Pin<Box<dyn Future<Output = dotloop_auth::Result<TokenResponse>> + Send + 'a>> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut tokens = self.tokens.lock().unwrap();
                (!tokens.is_empty()).then(|| tokens.remove(0))
            };
            Box::pin(async move {
                match next {
                    Some(access) => Ok(TokenResponse {
                        access_token: access.into(),
                        refresh_token: None,
                        expires_in: Some(3600),
                        token_type: Some("Bearer".into()),
                        scope: None,
                        extra: Default::default(),
                    }),
                    None => Err(dotloop_auth::Error::Upstream {
                        status: 400,
                        body: r#"{"error":"invalid_grant"}"#.into(),
                    }),
                }
            })
        }
    }

    #[derive(Clone)]
    pub(crate) struct Reply {
        pub status: StatusCode,
        pub content_type: &'static str,
        pub body: &'static [u8],
        pub headers: Vec<(&'static str, &'static str)>,
    }

    impl Reply {
        pub(crate) fn json(status: StatusCode, body: &'static str) -> Self {
            Self {
                status,
                content_type: "application/json",
                body: body.as_bytes(),
                headers: Vec::new(),
            }
        }
    }

    #[derive(Debug, Clone)]
    pub(crate) struct Seen {
        pub method: String,
        pub path_and_query: String,
        pub authorization: Option<String>,
        pub accept: Option<String>,
        pub content_type: Option<String>,
        pub body: Vec<u8>,
    }

    /// Stub resource API. Replies are consumed in order; the last one repeats.
    pub(crate) async fn start_api(replies: Vec<Reply>) -> (String, Arc<Mutex<Vec<Seen>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let replies = Arc::new(Mutex::new(replies));
        let log = seen.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = Router::new().fallback(move |req: Request| {
            let log = log.clone();
            let replies = replies.clone();
            async move {
                let (parts, body) = req.into_parts();
                // The header closure must not live across the body await.
                let mut entry = {
                    let header = |name: &str| {
                        parts
                            .headers
                            .get(name)
                            .map(|v| v.to_str().unwrap().to_string())
                    };
                    Seen {
                        method: parts.method.to_string(),
                        path_and_query: parts
                            .uri
                            .path_and_query()
                            .map(|pq| pq.to_string())
                            .unwrap_or_default(),
                        authorization: header("authorization"),
                        accept: header("accept"),
                        content_type: header("content-type"),
                        body: Vec::new(),
                    }
                };
                entry.body = axum::body::to_bytes(body, usize::MAX)
                    .await
                    .unwrap()
                    .to_vec();
                log.lock().unwrap().push(entry);

                let reply = {
                    let mut replies = replies.lock().unwrap();
                    if replies.len() > 1 {
                        replies.remove(0)
                    } else {
                        replies[0].clone()
                    }
                };
                let mut builder = axum::http::Response::builder()
                    .status(reply.status)
                    .header("content-type", reply.content_type);
                for (name, value) in &reply.headers {
                    builder = builder.header(*name, *value);
                }
                builder.body(axum::body::Body::from(reply.body)).unwrap()
            }
        });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/proxy"), seen)
    }

    pub(crate) fn valid_record(access: &str) -> CredentialRecord {
        CredentialRecord {
            access_token: access.into(),
            refresh_token: Some("R".into()),
            expires_at: Some(now_millis() + 3_600_000),
        }
    }

    pub(crate) fn expired_record(refresh: Option<&str>) -> CredentialRecord {
        CredentialRecord {
            access_token: "stale".into(),
            refresh_token: refresh.map(str::to_string),
            expires_at: Some(now_millis() - 1_000),
        }
    }

    pub(crate) async fn relay_with(
        base: &str,
        record: CredentialRecord,
        tokens: Arc<FakeTokens>,
    ) -> (ApiRelay, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::with_record(record));
        let manager = TokenManager::load(OAuthSettings::default(), tokens, store.clone()).await;
        (
            ApiRelay::new(reqwest::Client::new(), base, Arc::new(manager)),
            store,
        )
    }

    #[tokio::test]
    async fn valid_token_is_sent_without_refresh() {
        let (base, seen) = start_api(vec![Reply::json(StatusCode::OK, r#"{"data":[]}"#)]).await;
        let tokens = FakeTokens::issuing(vec![]);
        let (relay, _) = relay_with(&base, valid_record("A"), tokens.clone()).await;

        let response = relay.request(&ApiRequest::get("/profile")).await.unwrap();
        assert!(response.is_success());
        assert_eq!(tokens.refresh_calls.load(Ordering::SeqCst), 0);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].path_and_query, "/proxy/profile");
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer A"));
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_before_sending() {
        let (base, seen) = start_api(vec![Reply::json(StatusCode::OK, r#"{"data":[]}"#)]).await;
        let tokens = FakeTokens::issuing(vec!["B"]);
        let (relay, store) = relay_with(&base, expired_record(Some("R")), tokens.clone()).await;

        relay.request(&ApiRequest::get("/profile")).await.unwrap();

        assert_eq!(tokens.refresh_calls.load(Ordering::SeqCst), 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer B"));
        assert_eq!(store.load().await.unwrap().access_token, "B");
    }

    #[tokio::test]
    async fn expired_without_refresh_token_requires_authentication() {
        let (base, seen) = start_api(vec![Reply::json(StatusCode::OK, "{}")]).await;
        let tokens = FakeTokens::issuing(vec!["B"]);
        let (relay, _) = relay_with(&base, expired_record(None), tokens.clone()).await;

        let err = relay.request(&ApiRequest::get("/profile")).await.unwrap_err();
        assert!(matches!(err, Error::AuthenticationRequired), "got {err:?}");
        assert_eq!(tokens.refresh_calls.load(Ordering::SeqCst), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn preflight_refresh_failure_terminates_request() {
        let (base, seen) = start_api(vec![Reply::json(StatusCode::OK, "{}")]).await;
        let tokens = FakeTokens::issuing(vec![]);
        let (relay, store) = relay_with(&base, expired_record(Some("R")), tokens).await;

        let err = relay.request(&ApiRequest::get("/profile")).await.unwrap_err();
        assert!(
            matches!(err, Error::Auth(dotloop_auth::Error::TokenRefresh { .. })),
            "got {err:?}"
        );
        assert!(seen.lock().unwrap().is_empty());
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn unauthorized_is_retried_once_with_new_token() {
        let (base, seen) = start_api(vec![
            Reply::json(StatusCode::UNAUTHORIZED, r#"{"message":"expired"}"#),
            Reply::json(StatusCode::OK, r#"{"data":{"id":1}}"#),
        ])
        .await;
        let tokens = FakeTokens::issuing(vec!["B"]);
        let (relay, _) = relay_with(&base, valid_record("A"), tokens.clone()).await;

        let response = relay.request(&ApiRequest::get("/account")).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body.as_json().unwrap()["data"]["id"], 1);
        assert_eq!(tokens.refresh_calls.load(Ordering::SeqCst), 1);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer A"));
        assert_eq!(seen[1].authorization.as_deref(), Some("Bearer B"));
    }

    #[tokio::test]
    async fn second_unauthorized_is_returned_unmodified() {
        let (base, seen) = start_api(vec![Reply::json(
            StatusCode::UNAUTHORIZED,
            r#"{"message":"still no"}"#,
        )])
        .await;
        let tokens = FakeTokens::issuing(vec!["B", "C"]);
        let (relay, _) = relay_with(&base, valid_record("A"), tokens.clone()).await;

        let response = relay.request(&ApiRequest::get("/account")).await.unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.body.as_json().unwrap()["message"], "still no");
        assert_eq!(tokens.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn refresh_failure_after_unauthorized_is_propagated() {
        let (base, seen) =
            start_api(vec![Reply::json(StatusCode::UNAUTHORIZED, "{}")]).await;
        let tokens = FakeTokens::issuing(vec![]);
        let (relay, store) = relay_with(&base, valid_record("A"), tokens).await;

        let err = relay.request(&ApiRequest::get("/account")).await.unwrap_err();
        match err {
            Error::Auth(dotloop_auth::Error::TokenRefresh { status, .. }) => {
                assert_eq!(status, Some(400));
            }
            other => panic!("expected refresh failure, got {other:?}"),
        }
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn other_errors_are_returned_as_responses() {
        let (base, _) = start_api(vec![Reply::json(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error":"Dotloop API error","status":500}"#,
        )])
        .await;
        let tokens = FakeTokens::issuing(vec![]);
        let (relay, _) = relay_with(&base, valid_record("A"), tokens.clone()).await;

        let response = relay.request(&ApiRequest::get("/loop")).await.unwrap();
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!response.is_success());
        assert_eq!(tokens.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn binary_response_is_passed_through_untouched() {
        let pdf: &'static [u8] = b"%PDF-1.7\n\x00\x01\x02\xff binary";
        let (base, _) = start_api(vec![Reply {
            status: StatusCode::OK,
            content_type: "application/pdf",
            body: pdf,
            headers: vec![("content-disposition", "attachment; filename=\"offer.pdf\"")],
        }])
        .await;
        let (relay, _) = relay_with(&base, valid_record("A"), FakeTokens::issuing(vec![])).await;

        let response = relay
            .request(&ApiRequest::get("/profile/1/loop/2/folder/3/document/4"))
            .await
            .unwrap();
        let binary = response.body.as_binary().expect("binary body");
        assert_eq!(&binary.bytes[..], pdf);
        assert_eq!(binary.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(
            binary.content_disposition.as_deref(),
            Some("attachment; filename=\"offer.pdf\"")
        );
        assert_eq!(binary.content_length, Some(pdf.len() as u64));
    }

    #[tokio::test]
    async fn body_is_sent_only_for_methods_that_carry_one() {
        let (base, seen) = start_api(vec![Reply::json(StatusCode::OK, "{}")]).await;
        let (relay, _) = relay_with(&base, valid_record("A"), FakeTokens::issuing(vec![])).await;

        let payload = serde_json::json!({"name": "New loop"});
        relay
            .request(&ApiRequest::new(Method::POST, "/profile/1/loop").json(payload.clone()))
            .await
            .unwrap();
        relay
            .request(&ApiRequest::get("/profile/1/loop").json(payload.clone()))
            .await
            .unwrap();
        relay
            .request(&ApiRequest::new(Method::DELETE, "/profile/1/loop/9").json(payload))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].content_type.as_deref(), Some("application/json"));
        let sent: serde_json::Value = serde_json::from_slice(&seen[0].body).unwrap();
        assert_eq!(sent["name"], "New loop");
        assert!(seen[1].body.is_empty());
        assert!(seen[2].body.is_empty());
    }

    #[tokio::test]
    async fn caller_headers_are_forwarded_but_authorization_is_replaced() {
        let (base, seen) = start_api(vec![Reply::json(StatusCode::OK, "{}")]).await;
        let (relay, _) = relay_with(&base, valid_record("A"), FakeTokens::issuing(vec![])).await;

        let request = ApiRequest::get("/profile?x=1")
            .header(ACCEPT, HeaderValue::from_static("application/pdf"))
            .header(AUTHORIZATION, HeaderValue::from_static("Bearer forged"))
            .header(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        relay.request(&request).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].path_and_query, "/proxy/profile?x=1");
        assert_eq!(seen[0].accept.as_deref(), Some("application/pdf"));
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer A"));
    }

    #[tokio::test]
    async fn unreachable_api_is_transport_error() {
        let (relay, _) = relay_with(
            "http://127.0.0.1:1/proxy",
            valid_record("A"),
            FakeTokens::issuing(vec![]),
        )
        .await;
        let err = relay.request(&ApiRequest::get("/profile")).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "got {err:?}");
    }
}
