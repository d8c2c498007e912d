//! Metrics collection and exposition.
//!
//! # Metrics
//! - `sniff_connections_total` (counter): accepted connections by detected `protocol`
//! - `sniff_accept_errors_total` (counter): failures of the underlying accept
//! - `sniff_tls_handshake_failures_total` (counter): handshakes that failed after detection
//! - `sniff_active_connections` (gauge): connections currently being served

use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::net::Classification;

/// Install the Prometheus exporter, serving scrapes on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_classification(classification: Classification) {
    counter!("sniff_connections_total", "protocol" => classification.as_str()).increment(1);
}

pub fn record_accept_error() {
    counter!("sniff_accept_errors_total").increment(1);
}

pub fn record_handshake_failure() {
    counter!("sniff_tls_handshake_failures_total").increment(1);
}
