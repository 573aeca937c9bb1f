//! Relay engine: resolve endpoint, forward, account.
//!
//! Admission happens before the engine is invoked (the server's rate limit
//! middleware); within one call the engine guarantees the other half of the
//! ordering contract: the usage recorder runs after the forwarder settles,
//! exactly once, whatever the outcome.

use bytes::Bytes;
use std::{sync::Arc, time::Instant};
use thiserror::Error;

use crate::{
    metrics::MetricsCollector,
    registry::EndpointRegistry,
    types::extract_method,
    usage::UsageRecorder,
};

use super::forwarder::{DEFAULT_RELAY_TIMEOUT, Forwarder, PROBE_TIMEOUT};

/// Error type for relay dispatch.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),
}

/// Settled relay with its accounting side effects applied.
#[derive(Debug, Clone)]
pub struct RelayOutcome {
    /// Endpoint the call was relayed through.
    pub endpoint_id: String,
    /// Body to return to the caller.
    pub body: serde_json::Value,
    /// Whether the relay succeeded from the caller's perspective.
    pub success: bool,
    /// Upstream round-trip latency in milliseconds.
    pub latency_ms: u64,
    /// Post-increment all-time relay count.
    pub total_relays: u64,
    /// Post-increment current-month relay count.
    pub monthly_relays: u64,
}

/// Coordinates forwarding and usage accounting for admitted requests.
///
/// Thread-safe; shared across inbound requests via `Arc`.
pub struct RelayEngine {
    registry: Arc<EndpointRegistry>,
    forwarder: Forwarder,
    recorder: Arc<UsageRecorder>,
    metrics: Arc<MetricsCollector>,
    relay_timeout: std::time::Duration,
}

impl RelayEngine {
    #[must_use]
    pub fn new(
        registry: Arc<EndpointRegistry>,
        forwarder: Forwarder,
        recorder: Arc<UsageRecorder>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self { registry, forwarder, recorder, metrics, relay_timeout: DEFAULT_RELAY_TIMEOUT }
    }

    /// Overrides the relay timeout (default 30 s). The probe timeout is
    /// fixed; probes are supposed to fail fast.
    #[must_use]
    pub fn with_relay_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.relay_timeout = timeout;
        self
    }

    /// Relays an admitted payload through the given endpoint.
    ///
    /// The payload is forwarded verbatim; the decoded upstream body (or a
    /// synthesized error envelope) comes back with post-increment usage
    /// totals for the response headers. The recorder is invoked exactly once
    /// per call, after the forwarder settles.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownEndpoint`] if the id is not registered.
    /// Upstream failures are not errors here; they settle into the body.
    pub async fn relay(&self, endpoint_id: &str, payload: Bytes) -> Result<RelayOutcome, RelayError> {
        let endpoint = self
            .registry
            .get(endpoint_id)
            .ok_or_else(|| RelayError::UnknownEndpoint(endpoint_id.to_string()))?;

        let method = extract_method(&payload).unwrap_or_else(|| "unknown".to_string());

        let started = Instant::now();
        let forwarded =
            self.forwarder.forward(&endpoint.upstream_url, payload, self.relay_timeout).await;
        let latency_ms: u64 = started.elapsed().as_millis().try_into().unwrap_or(u64::MAX);

        let snapshot =
            self.recorder.record_relay(endpoint_id, &method, latency_ms, forwarded.success);
        self.metrics.record_relay(endpoint_id, &method, forwarded.success, latency_ms);

        tracing::debug!(
            endpoint_id,
            method = %method,
            latency_ms,
            success = forwarded.success,
            total_relays = snapshot.total_relays,
            "relay settled"
        );

        Ok(RelayOutcome {
            endpoint_id: endpoint_id.to_string(),
            body: forwarded.body,
            success: forwarded.success,
            latency_ms,
            total_relays: snapshot.total_relays,
            monthly_relays: snapshot.monthly_relays,
        })
    }

    /// Operator-initiated endpoint probe: a fixed `eth_blockNumber` call with
    /// the shorter probe timeout. Probes are relays and are accounted as such.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownEndpoint`] if the id is not registered.
    pub async fn probe(&self, endpoint_id: &str) -> Result<RelayOutcome, RelayError> {
        let endpoint = self
            .registry
            .get(endpoint_id)
            .ok_or_else(|| RelayError::UnknownEndpoint(endpoint_id.to_string()))?;

        let payload =
            Bytes::from_static(br#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}"#);

        let started = Instant::now();
        let forwarded = self.forwarder.forward(&endpoint.upstream_url, payload, PROBE_TIMEOUT).await;
        let latency_ms: u64 = started.elapsed().as_millis().try_into().unwrap_or(u64::MAX);

        let snapshot = self.recorder.record_relay(
            endpoint_id,
            "eth_blockNumber",
            latency_ms,
            forwarded.success,
        );
        self.metrics.record_relay(endpoint_id, "eth_blockNumber", forwarded.success, latency_ms);

        Ok(RelayOutcome {
            endpoint_id: endpoint_id.to_string(),
            body: forwarded.body,
            success: forwarded.success,
            latency_ms,
            total_relays: snapshot.total_relays,
            monthly_relays: snapshot.monthly_relays,
        })
    }

    /// Returns a reference to the usage recorder.
    #[must_use]
    pub fn recorder(&self) -> &Arc<UsageRecorder> {
        &self.recorder
    }

    /// Returns a reference to the endpoint registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }
}
