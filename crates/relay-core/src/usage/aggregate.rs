//! Periodic aggregation of raw relay records into hourly usage buckets.
//!
//! Raw records live in the recorder's bounded per-endpoint rings; the
//! aggregator folds anything newer than its last fold into per-hour buckets
//! (request count, error count, latency distribution), then prunes raw
//! records past the raw retention window and drops buckets past the
//! aggregate horizon. Error rate and latency percentiles are computed from
//! the folded data on read.

use chrono::{DateTime, Timelike, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;

use super::UsageRecorder;

/// Default horizon for keeping hourly buckets.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(48 * 60 * 60);

/// Default age past which raw ring records are pruned after folding.
pub const DEFAULT_RAW_RETENTION: Duration = Duration::from_secs(10 * 60);

/// Aggregated usage for one endpoint over one hour.
#[derive(Debug, Clone)]
pub struct UsageAggregate {
    /// Start of the hour this bucket covers.
    pub hour: DateTime<Utc>,
    /// Relays folded into the bucket.
    pub requests: u64,
    /// Relays that settled unsuccessfully.
    pub errors: u64,
    /// Fraction of relays that failed, `0.0` for an empty bucket.
    pub error_rate: f64,
    pub latency_mean_ms: u64,
    pub latency_p50_ms: u64,
    pub latency_p95_ms: u64,
    pub latency_p99_ms: u64,
}

#[derive(Debug, Default)]
struct HourlyBucket {
    requests: u64,
    errors: u64,
    latencies_ms: Vec<u64>,
}

impl HourlyBucket {
    fn to_aggregate(&self, hour: DateTime<Utc>) -> UsageAggregate {
        let mut sorted = self.latencies_ms.clone();
        sorted.sort_unstable();

        #[allow(clippy::cast_precision_loss)]
        let error_rate =
            if self.requests == 0 { 0.0 } else { self.errors as f64 / self.requests as f64 };

        let mean = if sorted.is_empty() {
            0
        } else {
            sorted.iter().sum::<u64>() / sorted.len() as u64
        };

        UsageAggregate {
            hour,
            requests: self.requests,
            errors: self.errors,
            error_rate,
            latency_mean_ms: mean,
            latency_p50_ms: percentile(&sorted, 50),
            latency_p95_ms: percentile(&sorted, 95),
            latency_p99_ms: percentile(&sorted, 99),
        }
    }
}

/// Nearest-rank percentile over a pre-sorted slice. Returns 0 when empty.
fn percentile(sorted: &[u64], pct: u32) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (u64::from(pct) * sorted.len() as u64).div_ceil(100);
    let index = rank.saturating_sub(1).min(sorted.len() as u64 - 1);
    sorted[usize::try_from(index).unwrap_or(usize::MAX)]
}

fn hour_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Folds raw relay records into hourly per-endpoint buckets.
pub struct UsageAggregator {
    recorder: Arc<UsageRecorder>,
    buckets: DashMap<(String, i64), HourlyBucket>,
    last_fold: Mutex<DateTime<Utc>>,
    interval: Duration,
    retention: Duration,
    raw_retention: Duration,
}

impl UsageAggregator {
    #[must_use]
    pub fn new(recorder: Arc<UsageRecorder>, interval: Duration, retention: Duration) -> Self {
        Self {
            recorder,
            buckets: DashMap::new(),
            last_fold: Mutex::new(Utc::now()),
            interval,
            retention,
            raw_retention: DEFAULT_RAW_RETENTION,
        }
    }

    /// Runs one fold pass: new raw records into buckets, then pruning.
    ///
    /// Records that raced in at or before the previous fold cutoff were
    /// already folded and are skipped; the cutoff advances atomically under
    /// the fold lock so no record is folded twice.
    pub fn fold_now(&self) {
        let now = Utc::now();
        let cutoff = {
            let mut last = self.last_fold.lock();
            std::mem::replace(&mut *last, now)
        };

        let mut folded = 0usize;
        for endpoint_id in self.recorder.endpoint_ids() {
            for record in self.recorder.records_since(&endpoint_id, cutoff) {
                if record.timestamp > now {
                    continue;
                }
                let hour = hour_start(record.timestamp).timestamp();
                let mut bucket = self.buckets.entry((endpoint_id.clone(), hour)).or_default();
                bucket.requests += 1;
                if !record.success {
                    bucket.errors += 1;
                }
                bucket.latencies_ms.push(record.latency_ms);
                folded += 1;
            }
        }

        let raw_cutoff = now -
            chrono::Duration::from_std(self.raw_retention).unwrap_or(chrono::Duration::zero());
        self.recorder.prune_older_than(raw_cutoff);

        let horizon = (now -
            chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::zero()))
        .timestamp();
        self.buckets.retain(|(_, hour), _| *hour >= horizon);

        if folded > 0 {
            tracing::debug!(folded, "folded relay records into hourly aggregates");
        }
    }

    /// Hourly aggregates for an endpoint, oldest first.
    #[must_use]
    pub fn hourly(&self, endpoint_id: &str) -> Vec<UsageAggregate> {
        let mut hours: Vec<(i64, UsageAggregate)> = self
            .buckets
            .iter()
            .filter(|e| e.key().0 == endpoint_id)
            .map(|e| {
                let hour_ts = e.key().1;
                let hour = DateTime::from_timestamp(hour_ts, 0).unwrap_or_else(Utc::now);
                (hour_ts, e.value().to_aggregate(hour))
            })
            .collect();
        hours.sort_by_key(|(ts, _)| *ts);
        hours.into_iter().map(|(_, agg)| agg).collect()
    }

    /// Spawns the periodic fold task, stopping on shutdown broadcast.
    pub fn start(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.fold_now(),
                    _ = shutdown.recv() => {
                        tracing::debug!("usage aggregator stopping");
                        break;
                    }
                }
            }
        })
    }
}
