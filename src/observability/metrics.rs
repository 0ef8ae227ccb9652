//! Metrics collection and exposition.
//!
//! # Metrics
//! - `graceful_exit_handlers_registered` (gauge): handlers waiting for shutdown
//! - `graceful_exit_triggers_total` (counter): shutdown triggers by source
//! - `graceful_exit_handlers_completed_total` (counter): completion signals
//! - `graceful_exit_exits_total` (counter): exits by outcome
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Prometheus exporter is opt-in (installed by the binary)

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_handlers_registered(count: usize) {
    gauge!("graceful_exit_handlers_registered").set(count as f64);
}

pub fn record_trigger(source: &str) {
    counter!("graceful_exit_triggers_total", "source" => source.to_string()).increment(1);
}

pub fn record_completion() {
    counter!("graceful_exit_handlers_completed_total").increment(1);
}

pub fn record_exit(outcome: &'static str) {
    counter!("graceful_exit_exits_total", "outcome" => outcome).increment(1);
}
