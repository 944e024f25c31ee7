//! Metrics definitions for the Stream Gateway.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sg_` prefix for Stream Gateway
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: HTTP methods only
//! - `endpoint`: route templates, unknown paths collapse to `/other`
//! - `status`: 3 values (success, error, timeout)
//! - `outcome`, `reason`: bounded by enum variants in this crate
//!
//! Session and owner ids are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to
/// render `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("sg_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Startup is bounded by the verification deadline (max 20s)
        .set_buckets_for_metric(
            Matcher::Full("sg_session_startup_duration_seconds".to_string()),
            &[0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 7.5, 10.0, 15.0, 20.0],
        )
        .map_err(|e| format!("Failed to set session startup buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `sg_http_requests_total`, `sg_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("sg_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("sg_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/health" | "/metrics" | "/api/v1/streams" => path.to_string(),
        _ => normalize_dynamic_endpoint(path),
    }
}

/// Replace owner, resource, and session ids with placeholders.
fn normalize_dynamic_endpoint(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();

    // /api/v1/streams/{session_id}
    if path.starts_with("/api/v1/streams/") && parts.len() == 5 {
        return "/api/v1/streams/{session_id}".to_string();
    }

    // /streams/{owner}/{resource}/{session_id}/{file}
    if path.starts_with("/streams/") && parts.len() == 6 {
        let file = parts.get(5).copied().unwrap_or_default();
        if file.ends_with(".m3u8") {
            return "/streams/{owner}/{resource}/{session_id}/manifest".to_string();
        }
        if file.ends_with(".ts") {
            return "/streams/{owner}/{resource}/{session_id}/segment".to_string();
        }
        return "/streams/{owner}/{resource}/{session_id}/{file}".to_string();
    }

    "/other".to_string()
}

// ============================================================================
// Session Metrics
// ============================================================================

/// Record the outcome of a conversion request.
///
/// Metric: `sg_sessions_started_total`, `sg_session_startup_duration_seconds`
/// Labels: `outcome`
///
/// The duration covers spawn through readiness and is only recorded for
/// requests that reached the supervisor.
pub fn record_session_start(outcome: &str, duration: Option<Duration>) {
    counter!("sg_sessions_started_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);

    if let Some(duration) = duration {
        histogram!("sg_session_startup_duration_seconds",
            "outcome" => outcome.to_string()
        )
        .record(duration.as_secs_f64());
    }
}

/// Record a completed teardown.
///
/// Metric: `sg_sessions_terminated_total`
/// Labels: `reason`
pub fn record_session_terminated(reason: &str) {
    counter!("sg_sessions_terminated_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Set the number of sessions in the `active` state.
///
/// Metric: `sg_sessions_active`
pub fn set_sessions_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sg_sessions_active").set(count as f64);
}

// ============================================================================
// Access Gateway Metrics
// ============================================================================

/// Record a denied artifact fetch.
///
/// Metric: `sg_gateway_denials_total`
/// Labels: `reason`
pub fn record_gateway_denial(reason: &str) {
    counter!("sg_gateway_denials_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}
