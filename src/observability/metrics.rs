//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (connections, fallbacks, rejections, traffic)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `proxy_connections_total` (counter): accepted TCP connections
//! - `proxy_http_requests_total` (counter): requests by method, status
//! - `proxy_http_request_duration_seconds` (histogram): handler latency
//! - `proxy_fallback_connections_total` (counter): connections handed off raw
//! - `proxy_rejected_connections_total` (counter): parse failures not
//!   eligible for fallback
//! - `proxy_active_bridges` / `proxy_active_bindings` (gauges): live pairs
//! - `proxy_bridge_tx_bytes_total` / `proxy_bridge_rx_bytes_total`
//!   (counters): bytes relayed client→backend and backend→client

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics recorder"),
    }
}

pub fn record_connection() {
    metrics::counter!("proxy_connections_total").increment(1);
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "proxy_http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("proxy_http_request_duration_seconds")
        .record(start.elapsed().as_secs_f64());
}

pub fn record_fallback() {
    metrics::counter!("proxy_fallback_connections_total").increment(1);
}

pub fn record_rejected() {
    metrics::counter!("proxy_rejected_connections_total").increment(1);
}

pub fn record_bridge_opened() {
    metrics::gauge!("proxy_active_bridges").increment(1.0);
}

pub fn record_bridge_closed() {
    metrics::gauge!("proxy_active_bridges").decrement(1.0);
}

pub fn record_bridge_traffic(sent: u64, received: u64) {
    metrics::counter!("proxy_bridge_tx_bytes_total").increment(sent);
    metrics::counter!("proxy_bridge_rx_bytes_total").increment(received);
}

pub fn record_binding_opened() {
    metrics::gauge!("proxy_active_bindings").increment(1.0);
}

pub fn record_binding_closed() {
    metrics::gauge!("proxy_active_bindings").decrement(1.0);
}
