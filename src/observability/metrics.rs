//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lb_requests_total` (counter): proxied requests by status
//! - `lb_request_duration_seconds` (histogram): end-to-end latency
//! - `lb_backend_active_connections` (gauge): in-flight requests per backend
//! - `lb_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `lb_membership_changes_total` (counter): heap joins/leaves per backend

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::health::Transition;

/// Install the Prometheus exporter and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a completed request.
pub fn record_request(status: u16, backend: &str, start: Instant) {
    counter!(
        "lb_requests_total",
        "status" => status.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);
    histogram!("lb_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_active_connections(backend: &str, active: usize) {
    gauge!("lb_backend_active_connections", "backend" => backend.to_string()).set(active as f64);
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("lb_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_transition(backend: &str, transition: Transition) {
    counter!(
        "lb_membership_changes_total",
        "backend" => backend.to_string(),
        "transition" => transition.as_str()
    )
    .increment(1);
}
