//! Request-level metrics middleware.

use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};

use crate::observability::metrics;

/// Count requests and responses and time each request.
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    metrics::record_request_received();

    let response = next.run(request).await;

    metrics::record_response(response.status().as_u16(), start);
    response
}
