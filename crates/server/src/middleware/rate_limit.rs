//! Rate limiting middleware for the relay route.
//!
//! Derives the limiter key from the endpoint id and caller address, applies
//! the endpoint's limit override when one is registered, and turns a
//! rejection into the gateway's 429 contract: a JSON body with `error` and
//! `retryAfter`, plus `Retry-After` and `X-RateLimit-*` headers.

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{net::SocketAddr, time::Duration};

use relay_core::ratelimit::derive_key;

use crate::state::AppState;

/// Admission gate in front of the relay handler.
///
/// Admitted requests continue down the stack; rejected ones are answered
/// here and never reach the forwarder or the usage recorder. Unknown
/// endpoint ids pass through untouched so the handler can answer 404 without
/// the limiter accumulating state for garbage ids.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    Path(endpoint_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.rate_limit.enabled {
        return next.run(request).await;
    }

    let Some(endpoint) = state.registry.get(&endpoint_id) else {
        return next.run(request).await;
    };

    let (max_requests, window) = match endpoint.rate_limit {
        Some(limit) => (limit.max_requests, Duration::from_secs(limit.window_seconds)),
        None => (
            state.rate_limit.max_requests,
            Duration::from_secs(state.rate_limit.window_seconds),
        ),
    };

    let key = derive_key(&endpoint_id, Some(addr.ip()), state.rate_limit.per_client);
    let decision = state.limiter.check_limit(&key, window, max_requests).await;

    if !decision.allowed {
        state.metrics.record_rejected(&endpoint_id);
        tracing::warn!(endpoint_id = %endpoint_id, client = %addr.ip(), "rate limit exceeded");

        let retry_after = decision.retry_after_secs();
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [
                ("retry-after", retry_after.to_string()),
                ("x-ratelimit-limit", decision.limit.to_string()),
                ("x-ratelimit-remaining", "0".to_string()),
                ("x-ratelimit-reset", decision.reset_at.timestamp().to_string()),
            ],
            Json(serde_json::json!({
                "error": "rate limit exceeded",
                "retryAfter": retry_after,
            })),
        )
            .into_response();
    }

    state.metrics.record_admitted(&endpoint_id);
    next.run(request).await
}
