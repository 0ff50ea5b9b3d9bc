//! Prometheus metrics exposition
//!
//! - `relay_requests_total` (counter): labels `route`, `method`, `status`
//! - `relay_request_duration_seconds` (histogram): label `route`
//! - `relay_upstream_errors_total` (counter): label `error_type`
//! - `token_grants_total` (counter): labels `grant_type`, `outcome`

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "relay_request_duration_seconds";

/// 5ms to 60s.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// The duration metric gets explicit buckets so it renders as a histogram
/// (`_bucket` lines) rather than a summary.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed request.
pub fn record_request(route: &'static str, method: &str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "relay_requests_total",
        "route" => route,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(DURATION_METRIC, "route" => route).record(duration_secs);
}

/// Record a failure to reach or get a usable answer from upstream.
pub fn record_upstream_error(error_type: &'static str) {
    metrics::counter!("relay_upstream_errors_total", "error_type" => error_type).increment(1);
}

/// Record the outcome of a token grant (`authorization_code` or `refresh_token`).
pub fn record_token_grant(grant_type: &'static str, outcome: &'static str) {
    metrics::counter!(
        "token_grants_total",
        "grant_type" => grant_type,
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(test)]
pub(crate) fn test_recorder() -> metrics_exporter_prometheus::PrometheusRecorder {
    builder().build_recorder()
}
