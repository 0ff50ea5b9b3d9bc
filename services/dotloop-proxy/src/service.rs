//! Shared service state
//!
//! `AppState` is built once in `main` and cloned into every handler. The
//! token client is only present when both halves of the client credentials
//! are configured; the token handlers answer 500 otherwise.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dotloop_auth::{OAuthSettings, TokenClient};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::Config;

/// Maximum time to wait for in-flight requests after a shutdown signal.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Counters reported on `/health`.
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub in_flight: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    /// Count a request; returns a guard that tracks it as in flight until dropped.
    pub fn begin_request(&self) -> InFlight {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlight(self.in_flight.clone())
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight gauge on drop.
pub struct InFlight(Arc<AtomicU64>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Which halves of the client credentials are configured. Presence only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialPresence {
    pub client_id: bool,
    pub client_secret: bool,
}

impl CredentialPresence {
    pub fn complete(self) -> bool {
        self.client_id && self.client_secret
    }
}

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub http: reqwest::Client,
    pub oauth: Arc<OAuthSettings>,
    pub token_client: Option<TokenClient>,
    pub api_url: String,
    pub credentials: CredentialPresence,
    pub metrics: ServiceMetrics,
    pub prometheus: PrometheusHandle,
}

impl AppState {
    pub fn from_config(
        config: &Config,
        http: reqwest::Client,
        prometheus: PrometheusHandle,
    ) -> Self {
        let oauth = config.dotloop.oauth.clone();
        let token_client = config
            .dotloop
            .client_credentials()
            .map(|creds| TokenClient::new(http.clone(), oauth.token_endpoint(), creds));
        Self {
            http,
            api_url: config.dotloop.api_url.trim_end_matches('/').to_string(),
            credentials: CredentialPresence {
                client_id: config.dotloop.client_id_configured(),
                client_secret: config.dotloop.client_secret_configured(),
            },
            oauth: Arc::new(oauth),
            token_client,
            metrics: ServiceMetrics::new(),
            prometheus,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_metrics_initializes_at_zero() {
        let metrics = ServiceMetrics::new();
        assert_eq!(metrics.requests_total.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.in_flight.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn in_flight_guard_tracks_request() {
        let metrics = ServiceMetrics::new();
        {
            let _guard = metrics.begin_request();
            assert_eq!(metrics.in_flight.load(Ordering::Relaxed), 1);
        }
        assert_eq!(metrics.in_flight.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.requests_total.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn presence_is_complete_only_with_both() {
        let both = CredentialPresence {
            client_id: true,
            client_secret: true,
        };
        let id_only = CredentialPresence {
            client_id: true,
            client_secret: false,
        };
        assert!(both.complete());
        assert!(!id_only.complete());
    }

    #[test]
    fn drain_timeout_is_five_seconds() {
        assert_eq!(DRAIN_TIMEOUT, Duration::from_secs(5));
    }
}
