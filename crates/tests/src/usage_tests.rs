//! Relay accounting, billing derivation, and hourly aggregation.

use relay_core::usage::{
    BillingRates, RECENT_CAPACITY, UsageRecorder, aggregate::UsageAggregator,
};
use std::{collections::HashMap, sync::Arc, time::Duration};

/// C recorded relays raise both counters by exactly C; interleaved calls
/// that were never forwarded change nothing.
#[test]
fn test_counts_track_settled_relays_exactly() {
    let recorder = UsageRecorder::new();

    for i in 0..7 {
        // Simulated rejected calls between relays: the recorder is simply
        // never invoked for them, so nothing to do here but not call it.
        let success = i % 2 == 0;
        recorder.record_relay("ep1", "eth_sendRawTransaction", 45, success);
    }

    let snapshot = recorder.snapshot("ep1").unwrap();
    assert_eq!(snapshot.total_relays, 7);
    assert_eq!(snapshot.monthly_relays, 7);
}

/// One relay on an endpoint with 10 existing relays yields a total of 11.
#[test]
fn test_total_increments_from_seeded_history() {
    let recorder = UsageRecorder::new();
    recorder.seed_total("ep1", 10);

    let snapshot = recorder.record_relay("ep1", "eth_blockNumber", 120, true);
    assert_eq!(snapshot.total_relays, 11);
}

/// Monthly cost is a pure function of the monthly count.
#[test]
fn test_monthly_cost_is_pure() {
    let recorder = UsageRecorder::new();
    for _ in 0..1000 {
        recorder.record_relay("ep1", "eth_call", 20, true);
    }

    let rates = BillingRates::new(0.000_8, HashMap::new());
    let monthly = recorder.snapshot("ep1").unwrap().monthly_relays;

    let first = rates.cost(monthly, None);
    let second = rates.cost(monthly, None);
    assert!((first - 0.8).abs() < 1e-12);
    assert!((first - second).abs() < f64::EPSILON, "recomputation must be stable");
}

/// Tier rates override the default; unknown tiers fall back.
#[test]
fn test_tier_rates() {
    let mut tiers = HashMap::new();
    tiers.insert("growth".to_string(), 0.000_4);
    let rates = BillingRates::new(0.000_8, tiers);

    assert!((rates.rate_for(Some("growth")) - 0.000_4).abs() < 1e-12);
    assert!((rates.rate_for(Some("missing")) - 0.000_8).abs() < 1e-12);
    assert!((rates.rate_for(None) - 0.000_8).abs() < 1e-12);
}

/// The recent ring caps at its capacity and keeps the newest records.
#[test]
fn test_recent_ring_bounded() {
    let recorder = UsageRecorder::new();

    for i in 0..(RECENT_CAPACITY * 2) {
        recorder.record_relay("ep1", &format!("m{i}"), 5, true);
    }

    let recent = recorder.recent("ep1");
    assert_eq!(recent.len(), RECENT_CAPACITY);
    assert_eq!(recent.last().unwrap().method, format!("m{}", RECENT_CAPACITY * 2 - 1));
}

/// Aggregation folds raw records into hourly buckets once each, computes
/// error rates and percentiles, and leaves the counters untouched.
#[test]
fn test_aggregation_fold() {
    let recorder = Arc::new(UsageRecorder::new());
    let aggregator = UsageAggregator::new(
        recorder.clone(),
        Duration::from_secs(60),
        Duration::from_secs(48 * 3600),
    );

    for latency in [10u64, 20, 30, 40, 50] {
        recorder.record_relay("ep1", "eth_getLogs", latency, latency != 30);
    }

    aggregator.fold_now();
    // A second fold must not double-count anything.
    aggregator.fold_now();

    let hourly = aggregator.hourly("ep1");
    let total_requests: u64 = hourly.iter().map(|b| b.requests).sum();
    let total_errors: u64 = hourly.iter().map(|b| b.errors).sum();

    assert_eq!(total_requests, 5);
    assert_eq!(total_errors, 1);
    assert_eq!(recorder.snapshot("ep1").unwrap().total_relays, 5, "folding leaves counters alone");
}
