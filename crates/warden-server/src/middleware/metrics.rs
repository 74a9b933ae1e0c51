/// Prometheus metrics middleware and exporter (spec.md §4.5 step 5,
/// §6 `/metrics`).
///
/// Exposes `/metrics` and tracks per-route HTTP metrics plus a handful
/// of Warden-specific series (cache size, refresh outcomes, rate-limit
/// rejections).
use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

use crate::state::AppState;

lazy_static! {
    static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "endpoint", "status"]
    )
    .unwrap();

    static ref HTTP_REQUEST_COUNTER: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total HTTP requests",
        &["method", "endpoint", "status"]
    )
    .unwrap();

    static ref HTTP_ERROR_COUNTER: IntCounterVec = register_int_counter_vec!(
        "http_errors_total",
        "Total HTTP errors",
        &["method", "endpoint", "status"]
    )
    .unwrap();

    static ref CACHE_SIZE: IntGauge =
        register_int_gauge!("warden_cache_size", "Entries in the current UserCache snapshot").unwrap();

    pub static ref REFRESH_OUTCOME: IntCounterVec = register_int_counter_vec!(
        "warden_refresh_outcomes_total",
        "Refresh-tick outcomes",
        &["outcome"]
    )
    .unwrap();

    pub static ref RATE_LIMIT_REJECTIONS: IntCounterVec = register_int_counter_vec!(
        "warden_rate_limit_rejections_total",
        "Requests denied by the rate limiter",
        &["endpoint"]
    )
    .unwrap();
}

pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let endpoint = normalize_endpoint(&path);

    let response = next.run(request).await;
    let status = response.status().as_u16().to_string();
    let duration = start.elapsed().as_secs_f64();

    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &endpoint, &status])
        .observe(duration);
    HTTP_REQUEST_COUNTER
        .with_label_values(&[&method, &endpoint, &status])
        .inc();

    if response.status().is_client_error() || response.status().is_server_error() {
        HTTP_ERROR_COUNTER
            .with_label_values(&[&method, &endpoint, &status])
            .inc();
    }

    response
}

pub(crate) fn normalize_endpoint(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    let normalized: Vec<String> = parts
        .iter()
        .map(|&part| {
            if part.len() == 36 && part.contains('-') {
                "{id}".to_string()
            } else if !part.is_empty() && part.chars().all(|c| c.is_ascii_hexdigit()) && part.len() >= 8 {
                "{id}".to_string()
            } else {
                part.to_string()
            }
        })
        .collect();
    normalized.join("/")
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    CACHE_SIZE.set(state.cache.size() as i64);

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics".to_string(),
        )
            .into_response();
    }

    let output = String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("Failed to convert metrics to UTF-8: {}", e);
        "Failed to convert metrics".to_string()
    });

    (StatusCode::OK, output).into_response()
}

pub fn create_metrics_router() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(metrics_handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("/api/v1/nodes/550e8400-e29b-41d4-a716-446655440000"),
            "/api/v1/nodes/{id}"
        );
        assert_eq!(normalize_endpoint("/user"), "/user");
        assert_eq!(
            normalize_endpoint("/api/v1/tasks/deadbeef12345678"),
            "/api/v1/tasks/{id}"
        );
    }
}
