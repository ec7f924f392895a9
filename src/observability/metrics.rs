//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define dispatch metrics (request count, latency, unhandled outcomes)
//! - Expose a Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `switchyard_requests_total` (counter): requests by method, status
//! - `switchyard_request_duration_seconds` (histogram): dispatch latency
//! - `switchyard_unhandled_total` (counter): responses completed by the
//!   application itself, by outcome (`not_found`, `error`, `timeout`)
//!
//! # Design Decisions
//! - Recording is a no-op until `init_metrics` installs the exporter
//! - Labels stay low-cardinality: no paths

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Why the application, rather than a handler, completed a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    NotFound,
    Error,
    Timeout,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::NotFound => "not_found",
            Outcome::Error => "error",
            Outcome::Timeout => "timeout",
        }
    }
}

/// Install the Prometheus recorder and its HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one dispatched request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    counter!("switchyard_requests_total", &labels).increment(1);
    histogram!("switchyard_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

/// Record a response completed by the application's fallback policy.
pub fn record_outcome(outcome: Outcome) {
    counter!("switchyard_unhandled_total", "outcome" => outcome.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::NotFound.as_str(), "not_found");
        assert_eq!(Outcome::Error.as_str(), "error");
        assert_eq!(Outcome::Timeout.as_str(), "timeout");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_request("GET", 200, Instant::now());
        record_outcome(Outcome::NotFound);
    }
}
