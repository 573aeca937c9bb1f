//! End-to-end relay flow: limiter → forwarder → recorder over HTTP.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
};
use relay_core::{
    config::{RateLimitConfig, ServerConfig},
    metrics::MetricsCollector,
    ratelimit::RateLimiter,
    registry::{EndpointRegistry, RelayEndpoint},
    relay::{Forwarder, RelayEngine},
    usage::{BillingRates, UsageRecorder, aggregate::UsageAggregator},
};
use serde_json::Value;
use server::{router::create_router, state::AppState};
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};
use tower::ServiceExt;

fn test_state(upstream_url: &str, rate_limit: RateLimitConfig, relay_timeout: Duration) -> AppState {
    let registry = Arc::new(EndpointRegistry::new());
    registry.upsert(RelayEndpoint {
        id: "ep1".to_string(),
        name: "flow test endpoint".to_string(),
        chain: "eth-mainnet".to_string(),
        upstream_url: upstream_url.to_string(),
        rate_limit: None,
        tier: None,
    });

    let recorder = Arc::new(UsageRecorder::new());
    let metrics = Arc::new(MetricsCollector::disabled());
    let engine = Arc::new(
        RelayEngine::new(
            registry.clone(),
            Forwarder::new().expect("forwarder"),
            recorder.clone(),
            metrics.clone(),
        )
        .with_relay_timeout(relay_timeout),
    );
    let aggregator = Arc::new(UsageAggregator::new(
        recorder.clone(),
        Duration::from_secs(60),
        Duration::from_secs(48 * 3600),
    ));

    AppState {
        engine,
        limiter: Arc::new(RateLimiter::local()),
        registry,
        recorder,
        aggregator,
        metrics,
        billing: Arc::new(BillingRates::new(0.001, HashMap::new())),
        rate_limit,
        server: ServerConfig::default(),
        start_time: Instant::now(),
    }
}

fn relay_request(endpoint_id: &str, payload: &str) -> Request<Body> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000);
    Request::builder()
        .method("POST")
        .uri(format!("/relay/{endpoint_id}"))
        .header("content-type", "application/json")
        .extension(ConnectInfo(addr))
        .body(Body::from(payload.to_string()))
        .unwrap()
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

const BLOCK_NUMBER: &str = r#"{"jsonrpc":"2.0","method":"eth_blockNumber","id":1}"#;

#[tokio::test]
async fn test_successful_relay_records_and_reports() {
    let mut upstream = mockito::Server::new_async().await;
    let _mock = upstream
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x1234"}"#)
        .expect(1)
        .create_async()
        .await;

    let state = test_state(&upstream.url(), RateLimitConfig::default(), Duration::from_secs(30));
    let app = create_router(state.clone());

    let response = app.oneshot(relay_request("ep1", BLOCK_NUMBER)).await.unwrap();
    let (parts, body) = response.into_parts();

    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(parts.headers.get("x-total-relays").unwrap(), "1");
    assert_eq!(parts.headers.get("x-monthly-relays").unwrap(), "1");

    let json = body_to_json(body).await;
    assert_eq!(json["result"], "0x1234");

    let recent = state.recorder.recent("ep1");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].method, "eth_blockNumber");
    assert!(recent[0].success);
}

#[tokio::test]
async fn test_unreachable_upstream_synthesizes_internal_error() {
    let state =
        test_state("http://127.0.0.1:1", RateLimitConfig::default(), Duration::from_secs(2));
    let app = create_router(state.clone());

    let response = app.oneshot(relay_request("ep1", BLOCK_NUMBER)).await.unwrap();
    let (parts, body) = response.into_parts();

    // Settled call: HTTP 200 with a JSON-RPC error envelope.
    assert_eq!(parts.status, StatusCode::OK);
    let json = body_to_json(body).await;
    assert_eq!(json["jsonrpc"], "2.0");
    assert_eq!(json["error"]["code"], -32603);
    assert!(json["id"].is_null());

    // The recorder still ran, with success = false.
    let recent = state.recorder.recent("ep1");
    assert_eq!(recent.len(), 1);
    assert!(!recent[0].success);
}

#[tokio::test]
async fn test_upstream_timeout_synthesizes_internal_error() {
    // An upstream that accepts connections and never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hang = tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            if let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        }
    });

    let state = test_state(
        &format!("http://{addr}"),
        RateLimitConfig::default(),
        Duration::from_millis(300),
    );
    let app = create_router(state.clone());

    let response = app.oneshot(relay_request("ep1", BLOCK_NUMBER)).await.unwrap();
    let (parts, body) = response.into_parts();

    assert_eq!(parts.status, StatusCode::OK);
    let json = body_to_json(body).await;
    assert_eq!(json["error"]["code"], -32603);
    assert!(json["id"].is_null());

    let recent = state.recorder.recent("ep1");
    assert_eq!(recent.len(), 1, "recorder runs exactly once on timeout");
    assert!(!recent[0].success);

    hang.abort();
}

#[tokio::test]
async fn test_non_json_upstream_synthesizes_parse_error() {
    let mut upstream = mockito::Server::new_async().await;
    let _mock = upstream
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body("service temporarily unavailable")
        .create_async()
        .await;

    let state = test_state(&upstream.url(), RateLimitConfig::default(), Duration::from_secs(30));
    let app = create_router(state.clone());

    let response = app.oneshot(relay_request("ep1", BLOCK_NUMBER)).await.unwrap();
    let (parts, body) = response.into_parts();

    assert_eq!(parts.status, StatusCode::OK);
    let json = body_to_json(body).await;
    assert_eq!(json["error"]["code"], -32700);

    assert!(!state.recorder.recent("ep1")[0].success);
}

/// Rejected calls never reach the upstream and never touch the counters:
/// the limiter settles before the forwarder, the recorder only after it.
#[tokio::test]
async fn test_rejected_calls_never_forward_or_count() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = upstream
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#)
        .expect(3)
        .create_async()
        .await;

    let rate_limit =
        RateLimitConfig { max_requests: 3, window_seconds: 60, ..RateLimitConfig::default() };
    let state = test_state(&upstream.url(), rate_limit, Duration::from_secs(30));
    let app = create_router(state.clone());

    for _ in 0..3 {
        let response = app.clone().oneshot(relay_request("ep1", BLOCK_NUMBER)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    for _ in 0..4 {
        let response = app.clone().oneshot(relay_request("ep1", BLOCK_NUMBER)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    mock.assert_async().await;
    assert_eq!(
        state.recorder.snapshot("ep1").unwrap().total_relays,
        3,
        "rejected calls must not be billed"
    );
}

#[tokio::test]
async fn test_probe_uses_fixed_payload_and_counts() {
    let mut upstream = mockito::Server::new_async().await;
    let _mock = upstream
        .mock("POST", "/")
        .match_body(mockito::Matcher::Regex(r#""method"\s*:\s*"eth_blockNumber""#.to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0xaa"}"#)
        .expect(1)
        .create_async()
        .await;

    let state = test_state(&upstream.url(), RateLimitConfig::default(), Duration::from_secs(30));
    let app = create_router(state.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/relay/ep1/probe")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.recorder.snapshot("ep1").unwrap().total_relays, 1);
}

#[tokio::test]
async fn test_batch_payload_passes_through() {
    let mut upstream = mockito::Server::new_async().await;
    let _mock = upstream
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"jsonrpc":"2.0","id":1,"result":"0x1"},{"jsonrpc":"2.0","id":2,"result":"0x2"}]"#)
        .create_async()
        .await;

    let state = test_state(&upstream.url(), RateLimitConfig::default(), Duration::from_secs(30));
    let app = create_router(state.clone());

    let batch = r#"[{"jsonrpc":"2.0","method":"eth_blockNumber","id":1},{"jsonrpc":"2.0","method":"eth_chainId","id":2}]"#;
    let response = app.oneshot(relay_request("ep1", batch)).await.unwrap();
    let (parts, body) = response.into_parts();

    assert_eq!(parts.status, StatusCode::OK);
    let json = body_to_json(body).await;
    assert_eq!(json.as_array().unwrap().len(), 2);

    // Batches are one relay from the gateway's perspective, labeled by the
    // fallback method name.
    let recent = state.recorder.recent("ep1");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].method, "unknown");
}
