//! Endpoint registry: resolves relay endpoint ids to upstream targets.
//!
//! The durable endpoint table is an external collaborator; in-process the
//! gateway only needs get/upsert over a small map. The registry is seeded
//! from configuration at startup and may be upserted at runtime. Unknown
//! ids relay nothing.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-endpoint rate limit override, replacing the global default when set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitOverride {
    /// Maximum admitted requests per window.
    pub max_requests: u32,
    /// Window length in seconds.
    pub window_seconds: u64,
}

/// A registered relay endpoint: one tenant-facing id mapped to one upstream
/// blockchain RPC provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEndpoint {
    /// Stable identifier used in the relay URL path and all accounting keys.
    pub id: String,
    /// Human-readable name for logs and dashboards.
    pub name: String,
    /// Chain this endpoint serves (e.g. "eth-mainnet", "polygon").
    pub chain: String,
    /// Upstream JSON-RPC URL requests are forwarded to.
    pub upstream_url: String,
    /// Optional rate limit override for this endpoint.
    #[serde(default)]
    pub rate_limit: Option<RateLimitOverride>,
    /// Optional billing tier; `None` bills at the global rate.
    #[serde(default)]
    pub tier: Option<String>,
}

/// In-process endpoint lookup table.
///
/// `Arc`-valued so a resolved endpoint stays valid for the duration of a
/// relay even if it is replaced concurrently.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: DashMap<String, Arc<RelayEndpoint>>,
}

impl EndpointRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { endpoints: DashMap::new() }
    }

    /// Builds a registry seeded with the given endpoints.
    #[must_use]
    pub fn from_seeds(seeds: impl IntoIterator<Item = RelayEndpoint>) -> Self {
        let registry = Self::new();
        for seed in seeds {
            registry.upsert(seed);
        }
        registry
    }

    /// Resolves an endpoint id.
    #[must_use]
    pub fn get(&self, endpoint_id: &str) -> Option<Arc<RelayEndpoint>> {
        self.endpoints.get(endpoint_id).map(|e| Arc::clone(&e))
    }

    /// Inserts or replaces an endpoint, returning the previous definition.
    pub fn upsert(&self, endpoint: RelayEndpoint) -> Option<Arc<RelayEndpoint>> {
        tracing::info!(
            endpoint_id = %endpoint.id,
            chain = %endpoint.chain,
            "endpoint registered"
        );
        self.endpoints.insert(endpoint.id.clone(), Arc::new(endpoint))
    }

    /// Removes an endpoint, returning its definition if it existed.
    pub fn remove(&self, endpoint_id: &str) -> Option<Arc<RelayEndpoint>> {
        self.endpoints.remove(endpoint_id).map(|(_, e)| e)
    }

    /// Number of registered endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
