//! Counter store abstraction for the fixed-window rate limiter.
//!
//! The limiter is policy; the store is bookkeeping. A [`CounterStore`] tracks
//! one counter per key inside a fixed window and reports the post-attempt
//! count, the window's reset time, and whether the attempt was admitted.
//! [`LocalCounterStore`] is the in-process variant; the shared variant lives
//! in [`super::redis`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Error type for counter store operations.
///
/// Only the shared store produces these; the local store is infallible.
/// The limiter treats any store error as a signal to degrade to the local
/// fallback, never as a reason to fail the request.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store protocol error: {0}")]
    Backend(String),
}

/// Post-attempt state of a key's current window.
#[derive(Debug, Clone)]
pub struct WindowState {
    /// Request count observed in the window after this attempt.
    pub count: u64,
    /// Wall-clock time at which the window expires and the count resets.
    pub reset_at: DateTime<Utc>,
    /// Whether this attempt was admitted.
    pub admitted: bool,
}

/// Fixed-window counter storage.
///
/// Implementations must create a fresh window (count 1, reset `now + window`)
/// when no entry exists or the previous window has expired, and must leave
/// the reset time untouched for attempts inside a live window. Implementations
/// backed by an unconditional atomic increment may let `count` grow past
/// `max_requests`; the admission decision is equivalent either way.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Records a request attempt against `key`'s current window.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store is unreachable or responds
    /// with something other than a counter. The local store never errors.
    async fn hit(
        &self,
        key: &str,
        window: Duration,
        max_requests: u32,
    ) -> Result<WindowState, StoreError>;
}

/// Per-key window slot held by the local store.
#[derive(Debug)]
struct WindowSlot {
    count: u64,
    deadline: Instant,
    reset_at: DateTime<Utc>,
}

impl WindowSlot {
    fn fresh(now: Instant, window: Duration) -> Self {
        Self {
            count: 0,
            deadline: now + window,
            reset_at: Utc::now() +
                chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero()),
        }
    }

    fn expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// In-process fixed-window counter store.
///
/// Strictly single-process: two gateway instances using local stores do not
/// see each other's counts, and concurrent increments on one entry may lose
/// updates under true parallelism. Both are accepted weaknesses of the
/// best-effort fallback; the shared store closes the gap where correctness
/// across instances matters.
#[derive(Debug, Default)]
pub struct LocalCounterStore {
    slots: DashMap<String, WindowSlot>,
}

impl LocalCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self { slots: DashMap::new() }
    }

    /// Synchronous equivalent of [`CounterStore::hit`], used directly on the
    /// degrade path so a dead shared store cannot add a second await point.
    pub fn hit_local(&self, key: &str, window: Duration, max_requests: u32) -> WindowState {
        let now = Instant::now();

        let mut slot =
            self.slots.entry(key.to_string()).or_insert_with(|| WindowSlot::fresh(now, window));

        if slot.expired(now) {
            *slot = WindowSlot::fresh(now, window);
        }

        if slot.count >= u64::from(max_requests) {
            return WindowState { count: slot.count, reset_at: slot.reset_at, admitted: false };
        }

        slot.count += 1;
        WindowState { count: slot.count, reset_at: slot.reset_at, admitted: true }
    }

    /// Removes entries whose window has expired. Returns the number removed.
    ///
    /// Called opportunistically by the limiter so fallback memory stays
    /// bounded without a dedicated sweeper task.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.expired(now));
        before - self.slots.len()
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.slots.len()
    }
}

#[async_trait]
impl CounterStore for LocalCounterStore {
    async fn hit(
        &self,
        key: &str,
        window: Duration,
        max_requests: u32,
    ) -> Result<WindowState, StoreError> {
        Ok(self.hit_local(key, window, max_requests))
    }
}
