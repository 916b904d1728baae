use axum::{extract::Request, middleware::Next, response::Response};
use metrics::{counter, histogram};
use std::time::Instant;

/// Record request counts and latency per method/path/status class.
///
/// Status is bucketed to its class ("2xx", "5xx") to keep label
/// cardinality bounded on services with many distinct error codes.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let status_class = format!("{}xx", response.status().as_u16() / 100);
    let labels = [
        ("method", method),
        ("path", path),
        ("status", status_class),
    ];

    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}
