//! Metrics collection and exposition.
//!
//! # Metrics
//! - `harvest_messages_parsed_total` (counter): parsed messages by kind
//! - `harvest_exchanges_total` (counter): emitted exchanges by outcome
//! - `harvest_orphan_responses_total` (counter): responses with no request
//! - `harvest_stream_errors_total` (counter): reported errors by stage
//! - `harvest_pending_requests` (gauge): requests awaiting a response
//! - `harvest_active_streams` (gauge): streams still being parsed
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; with no exporter
//!   installed every call is a no-op
//! - Prometheus exposition is opt-in

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_message_parsed(kind: &'static str) {
    counter!("harvest_messages_parsed_total", "kind" => kind).increment(1);
}

pub fn record_exchange(complete: bool) {
    let outcome = if complete { "complete" } else { "incomplete" };
    counter!("harvest_exchanges_total", "outcome" => outcome).increment(1);
}

pub fn record_orphan_response() {
    counter!("harvest_orphan_responses_total").increment(1);
}

pub fn record_error(stage: &'static str) {
    counter!("harvest_stream_errors_total", "stage" => stage).increment(1);
}

pub fn record_pending_requests(pending: usize) {
    gauge!("harvest_pending_requests").set(pending as f64);
}

pub fn record_active_streams(active: u64) {
    gauge!("harvest_active_streams").set(active as f64);
}
