//! Metrics collection and exposition.
//!
//! # Metrics
//! - `linkguard_requests_total` (counter): dispatched requests by outcome
//! - `linkguard_request_duration_seconds` (histogram): dispatched call latency
//! - `linkguard_queue_depth` (gauge): active requests
//! - `linkguard_probe_total` (counter): probes by outcome
//! - `linkguard_probe_latency_seconds` (histogram): probe latency
//! - `linkguard_failover_total` (counter): failover runs by outcome
//! - `linkguard_network_reachable` (gauge): 1=reachable, 0=not
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Outcome labels are a closed set of static strings

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request_outcome(outcome: &'static str) {
    counter!("linkguard_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_request_duration(elapsed: Duration) {
    histogram!("linkguard_request_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn set_queue_depth(depth: usize) {
    gauge!("linkguard_queue_depth").set(depth as f64);
}

pub fn record_probe(success: bool, latency: Duration) {
    let outcome = if success { "success" } else { "failure" };
    counter!("linkguard_probe_total", "outcome" => outcome).increment(1);
    histogram!("linkguard_probe_latency_seconds").record(latency.as_secs_f64());
}

pub fn record_failover(outcome: &'static str) {
    counter!("linkguard_failover_total", "outcome" => outcome).increment(1);
}

pub fn set_reachable(reachable: bool) {
    gauge!("linkguard_network_reachable").set(if reachable { 1.0 } else { 0.0 });
}
