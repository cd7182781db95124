//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, health, verdicts)
//! - Expose a Prometheus scrape endpoint
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, backend, outcome
//! - `proxy_request_duration_seconds` (histogram): end-to-end latency
//! - `proxy_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `proxy_verdicts_total` (counter): classifier verdicts by label
//! - `proxy_classifier_fallbacks_total` (counter): fail-open substitutions by reason
//!
//! # Design Decisions
//! - Recording functions are no-ops until a recorder is installed, so tests and
//!   embedders need no setup

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the global recorder and start the scrape listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, backend: &str, outcome: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("backend", backend.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!("proxy_requests_total", &labels).increment(1);
    histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("proxy_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_verdict(label: &str, malicious: bool) {
    counter!(
        "proxy_verdicts_total",
        "label" => label.to_string(),
        "blocked" => malicious.to_string()
    )
    .increment(1);
}

pub fn record_classifier_fallback(reason: &'static str) {
    counter!("proxy_classifier_fallbacks_total", "reason" => reason).increment(1);
}
