//! Metrics collection and exposition.
//!
//! # Metrics
//! - `intake_requests_total` (counter): requests by method, status
//! - `intake_request_duration_seconds` (histogram): latency distribution
//! - `intake_active_connections` (gauge): current connection count
//! - `intake_connections_total` (counter): accepted connections
//! - `intake_events_reported_total` (counter): batches handed to the reporter, by outcome
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "intake_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("intake_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_connection_opened() {
    counter!("intake_connections_total").increment(1);
    gauge!("intake_active_connections").increment(1.0);
}

pub fn record_connection_closed() {
    gauge!("intake_active_connections").decrement(1.0);
}

pub fn record_reported(outcome: &'static str) {
    counter!("intake_events_reported_total", "outcome" => outcome).increment(1);
}
