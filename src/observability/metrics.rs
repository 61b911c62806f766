//! Metrics collection and exposition.
//!
//! # Metrics
//! - `sessions_created_total` (counter): transports built by the registry
//! - `session_creation_failures_total` (counter)
//! - `sessions_closed_total` (counter)
//! - `session_close_failures_total` (counter): close errors and timeouts
//! - `sessions_open` (gauge): currently open sessions
//! - `shutdown_runs_total` (counter): by outcome
//! - `shutdown_failures_total` (counter): by failure kind
//! - `emergency_shutdowns_total` (counter)
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is optional and installed by the binary

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_session_created(open: usize) {
    counter!("sessions_created_total").increment(1);
    record_open_sessions(open);
}

pub fn record_session_creation_failure() {
    counter!("session_creation_failures_total").increment(1);
}

pub fn record_session_closed() {
    counter!("sessions_closed_total").increment(1);
}

pub fn record_session_close_failure() {
    counter!("session_close_failures_total").increment(1);
}

pub fn record_open_sessions(open: usize) {
    gauge!("sessions_open").set(open as f64);
}

pub fn record_shutdown_run(outcome: &'static str) {
    counter!("shutdown_runs_total", "outcome" => outcome).increment(1);
}

pub fn record_shutdown_failure(kind: &'static str) {
    counter!("shutdown_failures_total", "kind" => kind).increment(1);
}

pub fn record_emergency_shutdown() {
    counter!("emergency_shutdowns_total").increment(1);
}
