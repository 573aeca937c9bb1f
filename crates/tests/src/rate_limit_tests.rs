//! Fixed-window admission properties of the rate limiter.

use relay_core::ratelimit::{
    CounterStore, LocalCounterStore, RateLimiter, StoreError, WindowState, derive_key,
};
use std::{net::IpAddr, sync::Arc, time::Duration};

const WINDOW: Duration = Duration::from_secs(1);

/// All N <= max calls inside one window are admitted and `remaining`
/// decreases monotonically to `max - N`.
#[tokio::test]
async fn test_remaining_decreases_monotonically() {
    let limiter = RateLimiter::local();
    let max = 8u32;

    let mut previous = max;
    for n in 1..=max {
        let decision = limiter.check_limit("ep1", WINDOW, max).await;
        assert!(decision.allowed, "call {n} of {max} must be admitted");
        assert_eq!(decision.remaining, max - n);
        assert!(decision.remaining < previous || n == 1);
        previous = decision.remaining;
    }
}

/// The (N+1)-th call within the window for max = N is rejected with
/// remaining = 0 and the reset time unchanged.
#[tokio::test]
async fn test_call_past_limit_rejected() {
    let limiter = RateLimiter::local();

    let mut last_reset = None;
    for _ in 0..5 {
        let decision = limiter.check_limit("ep1", Duration::from_secs(60), 5).await;
        assert!(decision.allowed);
        last_reset = Some(decision.reset_at);
    }

    let rejected = limiter.check_limit("ep1", Duration::from_secs(60), 5).await;
    assert!(!rejected.allowed);
    assert_eq!(rejected.remaining, 0);
    assert_eq!(Some(rejected.reset_at), last_reset, "rejection must not move the window");
}

/// After the reset time elapses, the next call is a fresh window.
#[tokio::test]
async fn test_window_expiry_starts_fresh() {
    let limiter = RateLimiter::local();
    let short = Duration::from_millis(40);

    for _ in 0..3 {
        assert!(limiter.check_limit("ep1", short, 3).await.allowed);
    }
    assert!(!limiter.check_limit("ep1", short, 3).await.allowed);

    tokio::time::sleep(Duration::from_millis(80)).await;

    let fresh = limiter.check_limit("ep1", short, 3).await;
    assert!(fresh.allowed);
    assert_eq!(fresh.remaining, 2, "fresh window starts at count 1");
}

/// Five calls at limit 5 are all admitted with the last at remaining 0;
/// the 6th is rejected.
#[tokio::test]
async fn test_five_then_reject_scenario() {
    let limiter = RateLimiter::local();
    let window = Duration::from_millis(1000);

    let mut last = None;
    for _ in 0..5 {
        let decision = limiter.check_limit("ep1", window, 5).await;
        assert!(decision.allowed);
        last = Some(decision);
    }
    assert_eq!(last.unwrap().remaining, 0);

    let sixth = limiter.check_limit("ep1", window, 5).await;
    assert!(!sixth.allowed);
    assert_eq!(sixth.remaining, 0);
}

/// Keys derived for different endpoints or callers never interfere.
#[tokio::test]
async fn test_distinct_keys_do_not_interfere() {
    let limiter = RateLimiter::local();
    let ip_a: IpAddr = "198.51.100.1".parse().unwrap();
    let ip_b: IpAddr = "198.51.100.2".parse().unwrap();

    let key_a = derive_key("ep1", Some(ip_a), true);
    let key_b = derive_key("ep1", Some(ip_b), true);
    assert_ne!(key_a, key_b);

    assert!(limiter.check_limit(&key_a, WINDOW, 1).await.allowed);
    assert!(!limiter.check_limit(&key_a, WINDOW, 1).await.allowed);

    // A different caller still has their own window.
    assert!(limiter.check_limit(&key_b, WINDOW, 1).await.allowed);
}

/// With per-client keying disabled, all callers share one window.
#[tokio::test]
async fn test_shared_key_when_per_client_disabled() {
    let limiter = RateLimiter::local();
    let ip_a: IpAddr = "198.51.100.1".parse().unwrap();
    let ip_b: IpAddr = "198.51.100.2".parse().unwrap();

    let key_a = derive_key("ep1", Some(ip_a), false);
    let key_b = derive_key("ep1", Some(ip_b), false);
    assert_eq!(key_a, key_b);

    assert!(limiter.check_limit(&key_a, WINDOW, 1).await.allowed);
    assert!(!limiter.check_limit(&key_b, WINDOW, 1).await.allowed);
}

/// Concurrent callers on one key never exceed the admission budget on the
/// local store.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admissions_bounded() {
    let limiter = Arc::new(RateLimiter::local());
    let max = 10u32;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            let mut admitted = 0u32;
            for _ in 0..5 {
                if limiter.check_limit("shared", Duration::from_secs(60), max).await.allowed {
                    admitted += 1;
                }
            }
            admitted
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }

    assert!(total <= max, "admitted {total} calls with a budget of {max}");
}

/// A failing shared store degrades to the local fallback without failing
/// requests, and the fallback still enforces the limit.
#[tokio::test]
async fn test_store_failure_degrades_not_fails() {
    struct FlakyStore {
        local: LocalCounterStore,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl CounterStore for FlakyStore {
        async fn hit(
            &self,
            key: &str,
            window: Duration,
            max_requests: u32,
        ) -> Result<WindowState, StoreError> {
            if self.fail.load(std::sync::atomic::Ordering::Relaxed) {
                Err(StoreError::Unavailable("simulated outage".to_string()))
            } else {
                Ok(self.local.hit_local(key, window, max_requests))
            }
        }
    }

    let store = Arc::new(FlakyStore {
        local: LocalCounterStore::new(),
        fail: std::sync::atomic::AtomicBool::new(false),
    });
    let limiter = RateLimiter::with_store(store.clone());

    assert!(limiter.check_limit("ep1", WINDOW, 10).await.allowed);

    store.fail.store(true, std::sync::atomic::Ordering::Relaxed);

    // Outage: every call still gets an answer, enforced by the fallback.
    assert!(limiter.check_limit("ep1", WINDOW, 2).await.allowed);
    assert!(limiter.check_limit("ep1", WINDOW, 2).await.allowed);
    assert!(!limiter.check_limit("ep1", WINDOW, 2).await.allowed);
}
