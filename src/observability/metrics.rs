//! Metrics collection and exposition.
//!
//! # Metrics
//! - `drawbridge_requests_received_total` (counter)
//! - `drawbridge_responses_sent_total` (counter): by status
//! - `drawbridge_request_duration_seconds` (histogram)
//! - `drawbridge_rate_limited_total` (counter): admission rejections
//! - `drawbridge_identity_faults_total` (counter)
//! - `drawbridge_tracked_clients` (gauge): limiter registry size
//! - `drawbridge_clients_evicted_total` (counter)
//! - `drawbridge_background_tasks` (gauge): tasks in flight
//! - `drawbridge_task_panics_total` (counter): by task

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request_received() {
    counter!("drawbridge_requests_received_total").increment(1);
}

pub fn record_response(status: u16, start: Instant) {
    counter!("drawbridge_responses_sent_total", "status" => status.to_string()).increment(1);
    histogram!("drawbridge_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited() {
    counter!("drawbridge_rate_limited_total").increment(1);
}

pub fn record_identity_fault() {
    counter!("drawbridge_identity_faults_total").increment(1);
}

pub fn record_tracked_clients(count: usize) {
    gauge!("drawbridge_tracked_clients").set(count as f64);
}

pub fn record_clients_evicted(count: usize) {
    counter!("drawbridge_clients_evicted_total").increment(count as u64);
}

pub fn record_task_started() {
    gauge!("drawbridge_background_tasks").increment(1.0);
}

pub fn record_task_finished() {
    gauge!("drawbridge_background_tasks").decrement(1.0);
}

pub fn record_task_panic(task: &'static str) {
    counter!("drawbridge_task_panics_total", "task" => task).increment(1);
}
