//! Prometheus metrics for the relay path.
//!
//! Built on the `metrics` facade with the Prometheus exporter installed as
//! the process-global recorder. Recording is lock-free counter/histogram
//! work on the hot path; rendering walks the recorder state only when the
//! `/metrics` endpoint is scraped.
//!
//! The exporter can be installed at most once per process, so the handle
//! lives in a `OnceLock` and every collector shares it. A collector built
//! with [`MetricsCollector::disabled`] records into the void (the facade's
//! no-op recorder) and renders nothing, which keeps tests independent of
//! process-global state.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use thiserror::Error;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Error type for metrics initialization.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to install prometheus recorder: {0}")]
    Install(String),
}

/// Records relay-path metrics and renders the Prometheus exposition text.
pub struct MetricsCollector {
    handle: Option<PrometheusHandle>,
}

impl MetricsCollector {
    /// Creates a collector, installing the process-global Prometheus
    /// recorder if it is not installed yet.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if the recorder cannot be installed
    /// and no previous install is available to share.
    pub fn new() -> Result<Self, MetricsError> {
        if let Some(handle) = PROMETHEUS_HANDLE.get() {
            return Ok(Self { handle: Some(handle.clone()) });
        }

        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let handle = PROMETHEUS_HANDLE.get_or_init(|| handle);
                Ok(Self { handle: Some(handle.clone()) })
            }
            // Lost an install race: another thread's handle is the one to use.
            Err(e) => match PROMETHEUS_HANDLE.get() {
                Some(handle) => Ok(Self { handle: Some(handle.clone()) }),
                None => Err(MetricsError::Install(e.to_string())),
            },
        }
    }

    /// Creates a collector without an exporter. Recording calls are no-ops
    /// unless some other component installed a global recorder.
    #[must_use]
    pub fn disabled() -> Self {
        Self { handle: None }
    }

    /// Records an admitted request at the rate limit gate.
    pub fn record_admitted(&self, endpoint_id: &str) {
        counter!("relay_requests_admitted_total", "endpoint" => endpoint_id.to_string())
            .increment(1);
    }

    /// Records a rejected request at the rate limit gate.
    pub fn record_rejected(&self, endpoint_id: &str) {
        counter!("relay_requests_rejected_total", "endpoint" => endpoint_id.to_string())
            .increment(1);
    }

    /// Records one settled relay: outcome counter plus latency histogram.
    pub fn record_relay(&self, endpoint_id: &str, method: &str, success: bool, latency_ms: u64) {
        let outcome = if success { "success" } else { "failure" };
        counter!(
            "relay_relays_total",
            "endpoint" => endpoint_id.to_string(),
            "method" => method.to_string(),
            "outcome" => outcome
        )
        .increment(1);

        #[allow(clippy::cast_precision_loss)]
        histogram!(
            "relay_upstream_latency_ms",
            "endpoint" => endpoint_id.to_string(),
            "method" => method.to_string()
        )
        .record(latency_ms as f64);
    }

    /// Records the number of registered endpoints.
    pub fn set_endpoint_count(&self, count: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("relay_registered_endpoints").set(count as f64);
    }

    /// Renders the Prometheus exposition format. Empty for disabled
    /// collectors.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.as_ref().map(PrometheusHandle::render).unwrap_or_default()
    }
}
