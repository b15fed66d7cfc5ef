//! Request tracing middleware
//!
//! Tags every request with a request id (taken from the caller when present)
//! and logs its outcome and latency. Heartbeats are frequent, so successful
//! ones are logged at debug level only.

use axum::{
    body::Body,
    http::{HeaderValue, Request, Response},
    middleware::Next,
};
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Header name for request ID
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Generate a new unique request ID
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

fn request_id_of(request: &Request<Body>) -> String {
    request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(generate_request_id)
}

fn is_chatty(path: &str) -> bool {
    path == "/rpc/heartbeat" || path.starts_with("/health/")
}

/// Adds a request id header and structured logging to each request
pub async fn request_tracing_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let start = Instant::now();
    let request_id = request_id_of(&request);
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = tracing::info_span!(
        "rpc",
        request_id = %request_id,
        method = %method,
        path = %path,
    );
    let mut response = next.run(request).instrument(span).await;

    let duration_ms = start.elapsed().as_millis() as u64;
    let status = response.status();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    if status.is_success() {
        if is_chatty(&path) {
            debug!(request_id = %request_id, path = %path, duration_ms, "Request completed");
        } else {
            info!(request_id = %request_id, path = %path, duration_ms, "Request completed");
        }
    } else if status.is_client_error() {
        warn!(
            request_id = %request_id,
            path = %path,
            status = status.as_u16(),
            duration_ms,
            "Client error"
        );
    } else {
        warn!(
            request_id = %request_id,
            path = %path,
            status = status.as_u16(),
            duration_ms,
            "Server error"
        );
    }

    response
}
