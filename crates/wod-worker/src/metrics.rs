//! Prometheus metrics for the worker.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Metric names as constants for consistency.
pub mod names {
    pub const TASKS_TOTAL: &str = "wod_tasks_total";
    pub const TASK_DURATION_SECONDS: &str = "wod_task_duration_seconds";
    pub const RETRIES_SCHEDULED_TOTAL: &str = "wod_retries_scheduled_total";
    pub const TASKS_DEAD_LETTERED_TOTAL: &str = "wod_tasks_dead_lettered_total";
    pub const CLEANUP_FAILURES_TOTAL: &str = "wod_cleanup_failures_total";
}

/// Serve metrics on `addr` from a background listener.
pub fn init_metrics_listener(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Record a finished task execution.
pub fn record_task(outcome: &str, duration: Duration) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::TASKS_TOTAL, &labels).increment(1);
    histogram!(names::TASK_DURATION_SECONDS, &labels).record(duration.as_secs_f64());
}

pub fn record_retry_scheduled() {
    counter!(names::RETRIES_SCHEDULED_TOTAL).increment(1);
}

pub fn record_dead_lettered() {
    counter!(names::TASKS_DEAD_LETTERED_TOTAL).increment(1);
}

/// Record a cleanup step that failed (`scratch_file` or `remote_file`).
pub fn record_cleanup_failure(resource: &str) {
    let labels = [("resource", resource.to_string())];
    counter!(names::CLEANUP_FAILURES_TOTAL, &labels).increment(1);
}
