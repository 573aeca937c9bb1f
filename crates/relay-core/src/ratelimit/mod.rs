//! Fixed-window rate limiting for the relay path.
//!
//! # Algorithm
//!
//! This is a **fixed-window counter**: the first request for a key opens a
//! window of `window` duration with count 1; requests inside a live window
//! increment the count and are admitted until `max_requests` is reached;
//! once the window's reset time passes, the next request opens a fresh
//! window. A burst straddling a window boundary can therefore admit up to
//! `2 × max_requests` in a short span. That imprecision is a documented
//! property of a best-effort gate, not a defect; a sliding-window or
//! token-bucket variant would slot in behind [`CounterStore`] if the
//! admission contract were ever tightened.
//!
//! # Storage
//!
//! Counters live behind the [`CounterStore`] seam. The shared Redis store is
//! preferred when configured (atomic increment-with-expiry, correct across
//! gateway instances); the in-process [`LocalCounterStore`] is both the
//! default store and the always-present fallback. Any shared-store failure
//! degrades to the local counter for that call: the limiter is a gate, not a
//! ledger, and must never fail a request because Redis is down.
//!
//! # Key derivation
//!
//! One policy, implemented only here: `{endpoint_id}:{caller_ip}`, with the
//! caller address dropped when per-client limiting is disabled (deliberate
//! single-origin load tests). No other module builds limiter keys.

pub mod redis;
pub mod store;

pub use store::{CounterStore, LocalCounterStore, StoreError, WindowState};

use chrono::{DateTime, Utc};
use std::{
    net::IpAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

/// How many limiter invocations pass between opportunistic purges of the
/// local store. Keeps fallback memory bounded without a sweeper task.
const PURGE_EVERY: u64 = 256;

/// Outcome of a [`RateLimiter::check_limit`] call.
#[derive(Debug, Clone)]
pub struct LimitDecision {
    /// Whether the request may proceed to the forwarder.
    pub allowed: bool,
    /// The limit the decision was made against.
    pub limit: u32,
    /// Requests left in the current window (`0` when rejected).
    pub remaining: u32,
    /// Wall-clock time the current window expires.
    pub reset_at: DateTime<Utc>,
}

impl LimitDecision {
    /// Seconds until the window resets, rounded up, for `Retry-After`.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        let millis = (self.reset_at - Utc::now()).num_milliseconds().max(0);
        millis.unsigned_abs().div_ceil(1000)
    }
}

/// Derives the limiter key for an inbound relay request.
///
/// This is the only place keys are constructed. The caller address is folded
/// in by default so one noisy client cannot exhaust an endpoint's quota for
/// everyone; `per_client = false` keys by endpoint alone.
#[must_use]
pub fn derive_key(endpoint_id: &str, client_ip: Option<IpAddr>, per_client: bool) -> String {
    match client_ip {
        Some(ip) if per_client => format!("{endpoint_id}:{ip}"),
        _ => endpoint_id.to_string(),
    }
}

/// Admission gate for proxied RPC calls.
///
/// Thread-safe and shared across all inbound requests via `Arc`.
pub struct RateLimiter {
    primary: Arc<dyn CounterStore>,
    fallback: Arc<LocalCounterStore>,
    invocations: AtomicU64,
}

impl RateLimiter {
    /// Creates a limiter backed only by the in-process store.
    #[must_use]
    pub fn local() -> Self {
        let local = Arc::new(LocalCounterStore::new());
        Self {
            primary: local.clone() as Arc<dyn CounterStore>,
            fallback: local,
            invocations: AtomicU64::new(0),
        }
    }

    /// Creates a limiter with an injected shared store and a fresh local
    /// fallback for the degrade path.
    #[must_use]
    pub fn with_store(store: Arc<dyn CounterStore>) -> Self {
        Self {
            primary: store,
            fallback: Arc::new(LocalCounterStore::new()),
            invocations: AtomicU64::new(0),
        }
    }

    /// Decides whether a request identified by `key` is admitted.
    ///
    /// Fresh or expired windows start at count 1 and admit with
    /// `remaining = max_requests - 1`; live windows at or above the limit
    /// reject with `remaining = 0` and an unchanged reset time. A failing
    /// shared store degrades to the local counter instead of failing the
    /// request.
    pub async fn check_limit(
        &self,
        key: &str,
        window: Duration,
        max_requests: u32,
    ) -> LimitDecision {
        self.maybe_purge();

        let state = match self.primary.hit(key, window, max_requests).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(key, error = %e, "shared counter store failed, using local fallback");
                metrics::counter!("relay_limiter_store_fallbacks_total").increment(1);
                self.fallback.hit_local(key, window, max_requests)
            }
        };

        let remaining = if state.admitted {
            u32::try_from(u64::from(max_requests).saturating_sub(state.count)).unwrap_or(0)
        } else {
            0
        };

        LimitDecision {
            allowed: state.admitted,
            limit: max_requests,
            remaining,
            reset_at: state.reset_at,
        }
    }

    /// Number of keys tracked by the local store (primary in local mode,
    /// fallback otherwise).
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.fallback.tracked_keys()
    }

    fn maybe_purge(&self) {
        let n = self.invocations.fetch_add(1, Ordering::Relaxed);
        if n % PURGE_EVERY == PURGE_EVERY - 1 {
            let removed = self.fallback.purge_expired();
            if removed > 0 {
                tracing::debug!(removed, "purged expired rate limit windows");
            }
            metrics::gauge!("relay_limiter_tracked_keys").set(self.fallback.tracked_keys() as f64);
        }
    }
}
