//! Relay usage accounting for billing and observability.
//!
//! Every forwarded call is recorded exactly once, after the upstream settles,
//! against the endpoint's all-time and current-month totals plus a bounded
//! ring of recent call records. Rejected (never-forwarded) calls touch
//! nothing. Billing cost is never accumulated incrementally: it is always
//! `relay count × cost per relay`, a pure function of the stored counters, so
//! recomputing after a counter correction yields consistent output.

pub mod aggregate;

use chrono::{DateTime, Datelike, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};

use crate::types::RelayRecord;

/// Capacity of the per-endpoint ring of recent relay records.
pub const RECENT_CAPACITY: usize = 100;

/// Post-increment counters returned to the caller for response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSnapshot {
    /// All-time relay count for the endpoint.
    pub total_relays: u64,
    /// Relay count in the current wall-clock month.
    pub monthly_relays: u64,
}

/// Month label for the monthly bucket, compared on every record so the
/// bucket resets lazily when the wall-clock month changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MonthLabel {
    year: i32,
    month: u32,
}

impl MonthLabel {
    fn of(ts: DateTime<Utc>) -> Self {
        Self { year: ts.year(), month: ts.month() }
    }
}

#[derive(Debug)]
struct EndpointUsage {
    total_relays: u64,
    month: MonthLabel,
    monthly_relays: u64,
    recent: VecDeque<RelayRecord>,
}

impl EndpointUsage {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_relays: 0,
            month: MonthLabel::of(now),
            monthly_relays: 0,
            recent: VecDeque::with_capacity(RECENT_CAPACITY),
        }
    }
}

/// Per-endpoint relay accounting.
///
/// Shared across all inbound requests via `Arc`; each record is a short
/// shard-locked map mutation, so callers treat it as fire-and-forget. It can
/// neither block on I/O nor fail the relayed response.
#[derive(Debug, Default)]
pub struct UsageRecorder {
    usage: DashMap<String, EndpointUsage>,
}

impl UsageRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self { usage: DashMap::new() }
    }

    /// Pre-seeds an endpoint's all-time total, for endpoints imported with
    /// existing history.
    pub fn seed_total(&self, endpoint_id: &str, total_relays: u64) {
        let now = Utc::now();
        let mut entry =
            self.usage.entry(endpoint_id.to_string()).or_insert_with(|| EndpointUsage::new(now));
        entry.total_relays = total_relays;
    }

    /// Records one settled relay and returns the post-increment totals.
    ///
    /// The monthly bucket is swapped for a fresh one when the wall-clock
    /// month has changed since the last record; the triggering call lands in
    /// the new bucket, so calls across the transition are counted exactly
    /// once.
    pub fn record_relay(
        &self,
        endpoint_id: &str,
        method: &str,
        latency_ms: u64,
        success: bool,
    ) -> UsageSnapshot {
        let record = RelayRecord::new(method, latency_ms, success);
        let label = MonthLabel::of(record.timestamp);

        let mut entry = self
            .usage
            .entry(endpoint_id.to_string())
            .or_insert_with(|| EndpointUsage::new(record.timestamp));

        if entry.month != label {
            entry.month = label;
            entry.monthly_relays = 0;
        }

        entry.total_relays += 1;
        entry.monthly_relays += 1;

        if entry.recent.len() >= RECENT_CAPACITY {
            entry.recent.pop_front();
        }
        entry.recent.push_back(record);

        UsageSnapshot { total_relays: entry.total_relays, monthly_relays: entry.monthly_relays }
    }

    /// Current totals for an endpoint, without recording anything.
    #[must_use]
    pub fn snapshot(&self, endpoint_id: &str) -> Option<UsageSnapshot> {
        self.usage.get(endpoint_id).map(|u| UsageSnapshot {
            total_relays: u.total_relays,
            monthly_relays: u.monthly_relays,
        })
    }

    /// Recent relay records for an endpoint, oldest first.
    #[must_use]
    pub fn recent(&self, endpoint_id: &str) -> Vec<RelayRecord> {
        self.usage
            .get(endpoint_id)
            .map(|u| u.recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Recent records newer than `cutoff`, for aggregation folds.
    #[must_use]
    pub fn records_since(&self, endpoint_id: &str, cutoff: DateTime<Utc>) -> Vec<RelayRecord> {
        self.usage
            .get(endpoint_id)
            .map(|u| u.recent.iter().filter(|r| r.timestamp > cutoff).cloned().collect())
            .unwrap_or_default()
    }

    /// Drops raw records older than `cutoff` from every ring.
    ///
    /// Run by the aggregator after a fold, so raw history never outlives its
    /// aggregate.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) {
        for mut entry in self.usage.iter_mut() {
            while entry.recent.front().is_some_and(|r| r.timestamp < cutoff) {
                entry.recent.pop_front();
            }
        }
    }

    /// Endpoint ids with any recorded usage.
    #[must_use]
    pub fn endpoint_ids(&self) -> Vec<String> {
        self.usage.iter().map(|e| e.key().clone()).collect()
    }

    /// Sum of all-time and monthly relay counts across endpoints.
    #[must_use]
    pub fn global_totals(&self) -> UsageSnapshot {
        let mut totals = UsageSnapshot { total_relays: 0, monthly_relays: 0 };
        for entry in self.usage.iter() {
            totals.total_relays += entry.total_relays;
            totals.monthly_relays += entry.monthly_relays;
        }
        totals
    }
}

/// Per-relay billing rates, a global default plus optional per-tier overrides.
#[derive(Debug, Clone)]
pub struct BillingRates {
    default_cost_per_relay: f64,
    tier_rates: HashMap<String, f64>,
}

impl BillingRates {
    #[must_use]
    pub fn new(default_cost_per_relay: f64, tier_rates: HashMap<String, f64>) -> Self {
        Self { default_cost_per_relay, tier_rates }
    }

    /// Rate applied to an endpoint, falling back to the global default for
    /// unknown or absent tiers.
    #[must_use]
    pub fn rate_for(&self, tier: Option<&str>) -> f64 {
        tier.and_then(|t| self.tier_rates.get(t).copied()).unwrap_or(self.default_cost_per_relay)
    }

    /// Billing cost for a relay count: `relays × cost_per_relay`.
    ///
    /// Pure in its inputs, so re-billing after a counter correction always
    /// yields the same output for the same count.
    #[must_use]
    pub fn cost(&self, relays: u64, tier: Option<&str>) -> f64 {
        // f64 mantissa is exact for counts below 2^53, far beyond any
        // realistic monthly relay volume.
        #[allow(clippy::cast_precision_loss)]
        let relays = relays as f64;
        relays * self.rate_for(tier)
    }
}
