//! Metrics collection and exposition.
//!
//! # Metrics
//! - `oppy_requests_total` (counter): requests by host and status
//! - `oppy_request_duration_seconds` (histogram): latency by host
//! - `oppy_reloads_total` (counter): file-system reconciliations by host
//! - `oppy_reload_changes_total` (counter): changed paths seen by reloads
//! - `oppy_reload_duration_seconds` (histogram): reconciliation time
//! - `oppy_extension_units` (gauge): compiled units per host
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(host: &str, status: u16, start: Instant) {
    let host = host.to_string();
    metrics::counter!(
        "oppy_requests_total",
        "host" => host.clone(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("oppy_request_duration_seconds", "host" => host)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_reload(host: &str, changes: usize, elapsed: Duration) {
    let host = host.to_string();
    metrics::counter!("oppy_reloads_total", "host" => host.clone()).increment(1);
    metrics::counter!("oppy_reload_changes_total", "host" => host.clone()).increment(changes as u64);
    metrics::histogram!("oppy_reload_duration_seconds", "host" => host).record(elapsed.as_secs_f64());
}

pub fn set_unit_count(host: &str, units: usize) {
    metrics::gauge!("oppy_extension_units", "host" => host.to_string()).set(units as f64);
}
