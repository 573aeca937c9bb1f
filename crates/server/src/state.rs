//! Shared state for HTTP handlers and middleware.

use std::{sync::Arc, time::Instant};

use relay_core::{
    config::{RateLimitConfig, ServerConfig},
    metrics::MetricsCollector,
    ratelimit::RateLimiter,
    registry::EndpointRegistry,
    relay::RelayEngine,
    usage::{BillingRates, UsageRecorder, aggregate::UsageAggregator},
};

/// Everything the handlers need, shared via `Arc` references.
///
/// Cloning is cheap; every field is either a reference-counted service or a
/// small copied config section.
#[derive(Clone)]
pub struct AppState {
    /// Relay engine (forwarder + recorder + registry).
    pub engine: Arc<RelayEngine>,

    /// Admission gate for the relay route.
    pub limiter: Arc<RateLimiter>,

    /// Endpoint lookup, shared with the engine.
    pub registry: Arc<EndpointRegistry>,

    /// Usage accounting, shared with the engine.
    pub recorder: Arc<UsageRecorder>,

    /// Hourly usage aggregation.
    pub aggregator: Arc<UsageAggregator>,

    /// Metrics collection and Prometheus rendering.
    pub metrics: Arc<MetricsCollector>,

    /// Billing rates for usage views.
    pub billing: Arc<BillingRates>,

    /// Rate limiter defaults and key policy.
    pub rate_limit: RateLimitConfig,

    /// Server sizing: body and concurrency limits.
    pub server: ServerConfig,

    /// Server start time for uptime reporting.
    pub start_time: Instant,
}
