//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Install the Prometheus recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "wod_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "wod_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "wod_http_requests_in_flight";

    // Queue metrics
    pub const QUEUE_LENGTH: &str = "wod_queue_length";
    pub const TASKS_ENQUEUED_TOTAL: &str = "wod_tasks_enqueued_total";
    pub const UPLOAD_BYTES_TOTAL: &str = "wod_upload_bytes_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Update queue length gauge.
pub fn set_queue_length(length: u64) {
    gauge!(names::QUEUE_LENGTH).set(length as f64);
}

/// Record a task handed to the queue.
pub fn record_task_enqueued(task_type: &str) {
    let labels = [("type", task_type.to_string())];
    counter!(names::TASKS_ENQUEUED_TOTAL, &labels).increment(1);
}

pub fn record_upload_bytes(bytes: u64) {
    counter!(names::UPLOAD_BYTES_TOTAL).increment(bytes);
}

/// Route template for metric labels, so session ids never become label values.
fn route_label(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string())
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = route_label(&request);
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_label_falls_back_when_unmatched() {
        let request = Request::builder().uri("/api/v1/analysis/s1").body(Body::empty()).unwrap();
        assert_eq!(route_label(&request), "unmatched");
    }
}
