// Circuit-breaker composite: primary outage is absorbed by the in-process store

use crate::common::FailingStore;
use coordination_core::core::metrics::CoordinationMetrics;
use coordination_core::core::models::RateLimitAlgorithm;
use coordination_core::engine::RateLimiter;
use coordination_core::state::store::AtomicStore;
use coordination_core::state::{InMemoryStore, ResilientStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn resilient(primary: Arc<FailingStore>, metrics: Arc<CoordinationMetrics>) -> Arc<ResilientStore> {
    Arc::new(
        ResilientStore::new(primary, Arc::new(InMemoryStore::new()), 2, Duration::from_secs(60))
            .with_metrics(metrics),
    )
}

#[tokio::test]
async fn test_limiter_keeps_counting_on_fallback() {
    let primary = Arc::new(FailingStore::down());
    let metrics = Arc::new(CoordinationMetrics::new().unwrap());
    let store = resilient(primary.clone(), metrics.clone());
    let limiter = RateLimiter::new(store.clone());
    let cancel = CancellationToken::new();

    for expected_remaining in [2u64, 1, 0] {
        let result = limiter
            .check_and_increment("user-1", 3, Duration::from_secs(60), RateLimitAlgorithm::FixedWindow, &cancel)
            .await;
        assert!(result.allowed);
        assert_eq!(result.remaining, expected_remaining);
    }
    let denied = limiter
        .check_and_increment("user-1", 3, Duration::from_secs(60), RateLimitAlgorithm::FixedWindow, &cancel)
        .await;
    assert!(!denied.allowed);
    assert_eq!(store.fallback().len().await, 1);
    assert_eq!(metrics.fallback_count("fixed_window"), 4);
}

#[tokio::test]
async fn test_open_circuit_stops_calling_primary() {
    let primary = Arc::new(FailingStore::down());
    let metrics = Arc::new(CoordinationMetrics::new().unwrap());
    let store = resilient(primary.clone(), metrics);

    for _ in 0..5 {
        store.set("k", "v", None).await.unwrap();
    }
    // Threshold is two consecutive failures; later calls are rejected by the breaker
    assert_eq!(primary.call_count(), 2);
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
}

#[tokio::test]
async fn test_ping_reports_primary_health() {
    let primary = Arc::new(FailingStore::down());
    let store = resilient(primary, Arc::new(CoordinationMetrics::new().unwrap()));
    assert!(store.ping().await.is_err());
    assert_eq!(store.backend_name(), "resilient");
}
