// Rate limiter: window arithmetic, atomic admission and the fail-open default

use crate::common::{mock_clock, FailingStore};
use coordination_core::core::metrics::CoordinationMetrics;
use coordination_core::core::models::{FailurePolicy, RateLimitAlgorithm, RateLimitRule};
use coordination_core::engine::RateLimiter;
use coordination_core::state::InMemoryStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MINUTE: Duration = Duration::from_secs(60);

#[tokio::test]
async fn test_sliding_window_admits_limit_then_recovers() {
    let clock = mock_clock();
    let store = Arc::new(InMemoryStore::with_clock(Arc::new(clock.clone())));
    let limiter = RateLimiter::new(store).with_clock(Arc::new(clock.clone()));
    let cancel = CancellationToken::new();

    for expected_remaining in (0..5u64).rev() {
        let result = limiter
            .check_and_increment("user-9", 5, MINUTE, RateLimitAlgorithm::SlidingWindow, &cancel)
            .await;
        assert!(result.allowed);
        assert_eq!(result.remaining, expected_remaining);
        clock.advance(Duration::from_secs(1));
    }

    let denied = limiter
        .check_and_increment("user-9", 5, MINUTE, RateLimitAlgorithm::SlidingWindow, &cancel)
        .await;
    assert!(!denied.allowed);
    assert_eq!(denied.current_count, 5);
    // Oldest hit was at start, so a slot frees at start + 60s
    assert_eq!(denied.reset_time, crate::common::test_start() + chrono::Duration::seconds(60));

    clock.advance(Duration::from_secs(56));
    let after = limiter
        .check_and_increment("user-9", 5, MINUTE, RateLimitAlgorithm::SlidingWindow, &cancel)
        .await;
    assert!(after.allowed);
}

#[tokio::test]
async fn test_fixed_window_resets_after_window() {
    let clock = mock_clock();
    let store = Arc::new(InMemoryStore::with_clock(Arc::new(clock.clone())));
    let limiter = RateLimiter::new(store).with_clock(Arc::new(clock.clone()));
    let cancel = CancellationToken::new();
    let window = Duration::from_secs(10);

    for _ in 0..3 {
        assert!(limiter
            .check_and_increment("ip", 3, window, RateLimitAlgorithm::FixedWindow, &cancel)
            .await
            .allowed);
        clock.advance(Duration::from_secs(2));
    }
    let denied = limiter
        .check_and_increment("ip", 3, window, RateLimitAlgorithm::FixedWindow, &cancel)
        .await;
    assert!(!denied.allowed);
    // Window is anchored to the first hit, later hits never extend it
    assert_eq!(denied.reset_time, crate::common::test_start() + chrono::Duration::seconds(10));

    clock.advance(Duration::from_secs(5));
    let fresh = limiter
        .check_and_increment("ip", 3, window, RateLimitAlgorithm::FixedWindow, &cancel)
        .await;
    assert!(fresh.allowed);
    assert_eq!(fresh.current_count, 1);
}

#[tokio::test]
async fn test_concurrent_callers_never_exceed_limit() {
    for algorithm in [RateLimitAlgorithm::SlidingWindow, RateLimitAlgorithm::FixedWindow] {
        let limiter = Arc::new(RateLimiter::new(Arc::new(InMemoryStore::new())));
        let mut handles = Vec::new();
        for _ in 0..40 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .check_and_increment("hot-key", 10, MINUTE, algorithm, &CancellationToken::new())
                    .await
                    .allowed
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10, "{} admitted {} of 40", algorithm, admitted);
    }
}

#[tokio::test]
async fn test_outage_fails_open() {
    let metrics = Arc::new(CoordinationMetrics::new().unwrap());
    let limiter = RateLimiter::new(Arc::new(FailingStore::down())).with_metrics(metrics.clone());
    let cancel = CancellationToken::new();

    let result = limiter
        .check_and_increment("any", 5, MINUTE, RateLimitAlgorithm::SlidingWindow, &cancel)
        .await;
    assert!(result.allowed);
    assert_eq!(result.current_count, 0);
    assert_eq!(result.remaining, 5);
    assert_eq!(metrics.rate_limit_count("degraded"), 1);
}

#[tokio::test]
async fn test_outage_with_fail_closed_override_denies() {
    let limiter = RateLimiter::new(Arc::new(FailingStore::down())).with_failure_policy(FailurePolicy::FailClosed);
    let result = limiter
        .check_and_increment("any", 5, MINUTE, RateLimitAlgorithm::FixedWindow, &CancellationToken::new())
        .await;
    assert!(!result.allowed);
    assert_eq!(result.remaining, 0);
}

#[tokio::test]
async fn test_hung_store_times_out_and_fails_open() {
    let store = FailingStore::new();
    store.hang.store(true, std::sync::atomic::Ordering::SeqCst);
    let limiter = RateLimiter::new(Arc::new(store)).with_operation_timeout(Duration::from_millis(20));

    let result = limiter
        .check_and_increment("slow", 1, MINUTE, RateLimitAlgorithm::SlidingWindow, &CancellationToken::new())
        .await;
    assert!(result.allowed);
}

#[tokio::test]
async fn test_batch_keys_are_independent() {
    let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()));
    let cancel = CancellationToken::new();
    let mut rules = HashMap::new();
    rules.insert("per-user".to_string(), RateLimitRule::new(1, MINUTE));
    rules.insert("per-tenant".to_string(), RateLimitRule::new(3, MINUTE));

    limiter.check_batch(&rules, RateLimitAlgorithm::FixedWindow, &cancel).await;
    let second = limiter.check_batch(&rules, RateLimitAlgorithm::FixedWindow, &cancel).await;

    assert!(!second["per-user"].allowed);
    assert!(second["per-tenant"].allowed);
    assert_eq!(second["per-tenant"].remaining, 1);
}

#[tokio::test]
async fn test_status_and_reset() {
    let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()));
    let cancel = CancellationToken::new();
    for _ in 0..2 {
        limiter
            .check_and_increment("k", 2, MINUTE, RateLimitAlgorithm::SlidingWindow, &cancel)
            .await;
    }

    let status = limiter
        .status("k", 2, MINUTE, RateLimitAlgorithm::SlidingWindow, &cancel)
        .await;
    assert!(!status.allowed);
    assert_eq!(status.current_count, 2);

    assert!(limiter.reset("k", &cancel).await.unwrap());
    let status = limiter
        .status("k", 2, MINUTE, RateLimitAlgorithm::SlidingWindow, &cancel)
        .await;
    assert_eq!(status.current_count, 0);
    assert!(status.allowed);
}
