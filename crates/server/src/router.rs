//! HTTP routes: relay, probe, usage views, health, and metrics.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use serde_json::Value;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::limit::RequestBodyLimitLayer;

use relay_core::relay::{RelayError, RelayOutcome};

use crate::{middleware::rate_limit_middleware, state::AppState};

/// Builds the application router.
///
/// The rate limit middleware wraps only the relay route: probes are
/// operator-initiated test calls, and the read-only views are not relays.
pub fn create_router(state: AppState) -> Router {
    let relay_route = Router::new()
        .route("/relay/{endpoint_id}", post(handle_relay))
        .route_layer(axum_middleware::from_fn_with_state(state.clone(), rate_limit_middleware));

    Router::new()
        .merge(relay_route)
        .route("/relay/{endpoint_id}/probe", post(handle_probe))
        .route("/relay/{endpoint_id}/usage", get(handle_usage))
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .layer(RequestBodyLimitLayer::new(state.server.max_body_bytes))
        .layer(ConcurrencyLimitLayer::new(state.server.max_concurrent_requests))
        .with_state(state)
}

/// Turns a settled relay into the success response contract: the upstream
/// body plus post-increment accounting headers.
fn relay_response(outcome: &RelayOutcome) -> Response {
    (
        StatusCode::OK,
        [
            ("x-rpc-latency", outcome.latency_ms.to_string()),
            ("x-endpoint-id", outcome.endpoint_id.clone()),
            ("x-total-relays", outcome.total_relays.to_string()),
            ("x-monthly-relays", outcome.monthly_relays.to_string()),
        ],
        Json(outcome.body.clone()),
    )
        .into_response()
}

fn unknown_endpoint_response(endpoint_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": format!("unknown endpoint: {endpoint_id}") })),
    )
        .into_response()
}

/// Relays a JSON-RPC payload through the named endpoint.
///
/// The body is forwarded to the upstream verbatim; whatever comes back
/// (including synthesized error envelopes) is returned with HTTP 200, the
/// JSON-RPC convention for settled calls.
pub async fn handle_relay(
    State(state): State<AppState>,
    Path(endpoint_id): Path<String>,
    body: Bytes,
) -> Response {
    match state.engine.relay(&endpoint_id, body).await {
        Ok(outcome) => relay_response(&outcome),
        Err(RelayError::UnknownEndpoint(id)) => unknown_endpoint_response(&id),
    }
}

/// Operator test call: relays a fixed `eth_blockNumber` with the shorter
/// probe timeout. Accounted like any relay.
pub async fn handle_probe(
    State(state): State<AppState>,
    Path(endpoint_id): Path<String>,
) -> Response {
    match state.engine.probe(&endpoint_id).await {
        Ok(outcome) => relay_response(&outcome),
        Err(RelayError::UnknownEndpoint(id)) => unknown_endpoint_response(&id),
    }
}

/// Read-only usage view: totals, derived monthly cost, hourly aggregates,
/// and the recent-call ring.
pub async fn handle_usage(
    State(state): State<AppState>,
    Path(endpoint_id): Path<String>,
) -> Response {
    let Some(endpoint) = state.registry.get(&endpoint_id) else {
        return unknown_endpoint_response(&endpoint_id);
    };

    let totals = state.recorder.snapshot(&endpoint_id).unwrap_or(relay_core::usage::UsageSnapshot {
        total_relays: 0,
        monthly_relays: 0,
    });
    let monthly_cost = state.billing.cost(totals.monthly_relays, endpoint.tier.as_deref());

    let hourly: Vec<Value> = state
        .aggregator
        .hourly(&endpoint_id)
        .into_iter()
        .map(|bucket| {
            serde_json::json!({
                "hour": bucket.hour.to_rfc3339(),
                "requests": bucket.requests,
                "errors": bucket.errors,
                "errorRate": bucket.error_rate,
                "latencyMeanMs": bucket.latency_mean_ms,
                "latencyP50Ms": bucket.latency_p50_ms,
                "latencyP95Ms": bucket.latency_p95_ms,
                "latencyP99Ms": bucket.latency_p99_ms,
            })
        })
        .collect();

    let recent: Vec<Value> = state
        .recorder
        .recent(&endpoint_id)
        .into_iter()
        .map(|record| {
            serde_json::json!({
                "method": record.method,
                "timestamp": record.timestamp.to_rfc3339(),
                "latencyMs": record.latency_ms,
                "success": record.success,
            })
        })
        .collect();

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "endpointId": endpoint_id,
            "chain": endpoint.chain,
            "totalRelays": totals.total_relays,
            "monthlyRelays": totals.monthly_relays,
            "monthlyCost": monthly_cost,
            "hourly": hourly,
            "recent": recent,
        })),
    )
        .into_response()
}

/// Liveness and aggregate relay totals.
pub async fn handle_health(State(state): State<AppState>) -> Response {
    let totals = state.recorder.global_totals();
    state.metrics.set_endpoint_count(state.registry.len());

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "endpoints": state.registry.len(),
            "relays": {
                "total": totals.total_relays,
                "monthly": totals.monthly_relays,
            },
            "uptimeSeconds": state.start_time.elapsed().as_secs(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

/// Prometheus exposition endpoint.
pub async fn handle_metrics(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
        .into_response()
}
