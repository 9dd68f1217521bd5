//! Prometheus metrics for the iSCSI session agent.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Metric names
pub mod names {
    /// Counter: agent operations (login/logout) by status
    pub const AGENT_OPERATIONS_TOTAL: &str = "iscsi_agent_operations_total";
    /// Histogram: duration of agent operations in seconds
    pub const AGENT_OPERATION_DURATION_SECONDS: &str =
        "iscsi_agent_operation_duration_seconds";
    /// Counter: iscsiadm invocations by mode and outcome
    pub const ISCSIADM_COMMANDS_TOTAL: &str = "iscsi_agent_iscsiadm_commands_total";
}

/// Initialize the Prometheus metrics exporter
///
/// Starts an HTTP server on the specified address that serves metrics
/// at the `/metrics` endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on http://{}/metrics", addr);
    Ok(())
}

/// Record one agent operation with its result
pub fn record_operation(operation: &str, status: &str, duration_secs: f64) {
    counter!(names::AGENT_OPERATIONS_TOTAL, "operation" => operation.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!(names::AGENT_OPERATION_DURATION_SECONDS, "operation" => operation.to_string())
        .record(duration_secs);
}

/// Record one iscsiadm invocation
pub fn record_command(mode: &str, outcome: &str) {
    counter!(names::ISCSIADM_COMMANDS_TOTAL, "mode" => mode.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}

/// Helper for timing operations
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    /// Start timing an operation
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    /// Complete the operation with success
    pub fn success(self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(&self.operation, "success", duration);
    }

    /// Complete the operation with failure
    pub fn failure(self, error_code: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(&self.operation, error_code, duration);
    }
}
