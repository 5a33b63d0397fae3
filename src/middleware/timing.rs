use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tokio::time::Instant;

pub const RESPONSE_TIME_HEADER: &str = "x-response-time";

/// Threshold above which a request is reported as slow.
#[derive(Debug, Clone, Copy)]
pub struct SlowRequestThreshold(pub Duration);

pub async fn timing_layer(
    State(SlowRequestThreshold(threshold)): State<SlowRequestThreshold>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let mut response = next.run(request).await;

    let elapsed = started.elapsed();
    if let Ok(value) = HeaderValue::from_str(&format!("{}ms", elapsed.as_millis())) {
        response.headers_mut().insert(RESPONSE_TIME_HEADER, value);
    }
    if elapsed >= threshold {
        tracing::warn!(
            %method,
            %path,
            status = %response.status(),
            ms = %elapsed.as_millis(),
            "slow request"
        );
    }
    response
}
