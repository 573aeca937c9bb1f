//! Shared counter store backed by Redis.
//!
//! Uses an atomic `INCR` plus a TTL to implement fixed windows that are
//! correct under concurrent callers across multiple gateway instances.
//! Unlike the local store, the counter here grows past the limit on rejected
//! attempts; the admission decision is unchanged and the window still resets
//! on key expiry.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use std::time::Duration;

use super::store::{CounterStore, StoreError, WindowState};

/// Namespace prefix so limiter keys cannot collide with anything else
/// sharing the Redis database.
const KEY_PREFIX: &str = "relaygate:rl:";

/// Fixed-window counter store on a shared Redis instance.
///
/// The connection manager reconnects on its own; individual command failures
/// surface as [`StoreError`] and are handled by the limiter's degrade path
/// rather than here.
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl RedisCounterStore {
    /// Connects to the given Redis URL and validates the connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the URL is malformed or the
    /// initial connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn hit(
        &self,
        key: &str,
        window: Duration,
        max_requests: u32,
    ) -> Result<WindowState, StoreError> {
        let mut conn = self.conn.clone();
        let redis_key = format!("{KEY_PREFIX}{key}");

        // INCR and PTTL in one atomic round trip. PTTL of -1/-2 means the
        // key has no expiry yet (this INCR created it, or a previous creator
        // died before setting one); either way this caller arms the window.
        let (count, pttl): (u64, i64) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(&redis_key)
            .cmd("PTTL")
            .arg(&redis_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);

        let remaining_ms = if pttl < 0 {
            let _: () = redis::cmd("PEXPIRE")
                .arg(&redis_key)
                .arg(window_ms)
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            window_ms
        } else {
            pttl
        };

        let reset_at = Utc::now() + chrono::Duration::milliseconds(remaining_ms);

        Ok(WindowState { count, reset_at, admitted: count <= u64::from(max_requests) })
    }
}
