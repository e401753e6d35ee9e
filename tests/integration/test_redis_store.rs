// Redis-backed store, limiter, cache and grants; each test skips without a server

use crate::common::{redis_available, sample_catalog};
use coordination_core::cache::{DistributedCache, InvalidationBatch, InvalidationEngine};
use coordination_core::config::Config;
use coordination_core::core::models::{CacheEntryOptions, GrantRequest, RateLimitAlgorithm};
use coordination_core::engine::{AuthorizationService, RateLimiter};
use coordination_core::state::store::{AtomicStore, StoreScript};
use coordination_core::state::RedisAtomicStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

async fn redis_store() -> Option<Arc<RedisAtomicStore>> {
    if !redis_available().await {
        eprintln!("Redis not reachable, skipping");
        return None;
    }
    let mut config = Config::test_config();
    if let Ok(url) = std::env::var("REDIS_URL") {
        config.redis_url = url;
    }
    Some(Arc::new(RedisAtomicStore::from_config(&config).await.unwrap()))
}

fn unique(prefix: &str) -> String {
    format!("it:{}:{}:", prefix, Uuid::new_v4())
}

#[tokio::test]
async fn test_increment_ttl_only_on_first_hit() {
    let Some(store) = redis_store().await else { return };
    let key = format!("{}counter", unique("incr"));

    assert_eq!(store.increment(&key, Some(Duration::from_secs(30))).await.unwrap(), 1);
    store.expire(&key, Duration::from_secs(90)).await.unwrap();
    assert_eq!(store.increment(&key, Some(Duration::from_secs(30))).await.unwrap(), 2);

    let ttl = store.ttl(&key).await.unwrap().unwrap();
    assert!(ttl > Duration::from_secs(60), "second increment must not reset the TTL: {:?}", ttl);
    store.delete(&key).await.unwrap();
}

#[tokio::test]
async fn test_sliding_window_admits_exactly_limit_under_contention() {
    let Some(store) = redis_store().await else { return };
    let limiter = Arc::new(RateLimiter::new(store.clone()).with_key_prefix(unique("rl")));
    let cancel = CancellationToken::new();

    let handles: Vec<_> = (0..30)
        .map(|_| {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                limiter
                    .check_and_increment("api", 12, Duration::from_secs(60), RateLimitAlgorithm::SlidingWindow, &cancel)
                    .await
                    .allowed
            })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 12);
    assert!(limiter.reset("api", &cancel).await.unwrap());
}

#[tokio::test]
async fn test_script_results_match_memory_semantics() {
    let Some(store) = redis_store().await else { return };
    let base = unique("script");
    let keys = vec![format!("{}fixed", base)];

    let first = store
        .execute_atomic(StoreScript::FixedWindow, &keys, &["60000".to_string(), "2".to_string()])
        .await
        .unwrap();
    assert_eq!(first[0], 1, "first hit admitted");
    assert_eq!(first[1], 1);
    assert!(first[2] > 0 && first[2] <= 60_000);

    store
        .execute_atomic(StoreScript::FixedWindow, &keys, &["60000".to_string(), "2".to_string()])
        .await
        .unwrap();
    let denied = store
        .execute_atomic(StoreScript::FixedWindow, &keys, &["60000".to_string(), "2".to_string()])
        .await
        .unwrap();
    assert_eq!(denied[0], 0);
    assert_eq!(denied[1], 2, "denied hits are not counted");
    store.delete_many(&keys).await.unwrap();
}

#[tokio::test]
async fn test_cache_tag_and_pattern_removal() {
    let Some(store) = redis_store().await else { return };
    let prefix = unique("cache");
    let cache = Arc::new(DistributedCache::new(store.clone()).with_key_prefix(prefix.clone()));
    let engine = InvalidationEngine::new(cache.clone(), Arc::new(sample_catalog().invalidation_catalog()));
    let cancel = CancellationToken::new();

    for id in 0..3 {
        cache
            .set(format!("orders:{}", id), &json!({"id": id}), CacheEntryOptions::default().with_tags([prefix.as_str()]), &cancel)
            .await
            .unwrap();
    }
    cache.set("Reports:Daily", &json!([]), CacheEntryOptions::default(), &cancel).await.unwrap();

    let report = engine
        .invalidate_batch(InvalidationBatch::default().tags([prefix.as_str()]).patterns(["reports:*"]), &cancel)
        .await;
    assert!(report.is_clean(), "{:?}", report.errors);
    assert_eq!(report.tag_entries_removed, 3);
    assert_eq!(report.pattern_entries_removed, 1);
    assert!(store.scan_prefix(&prefix).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_grant_round_trip() {
    let Some(store) = redis_store().await else { return };
    let resolver = Arc::new(sample_catalog().permission_resolver().unwrap());
    let authz = AuthorizationService::new(store, resolver);
    let cancel = CancellationToken::new();
    let resource = Uuid::new_v4().to_string();

    authz
        .grant_permission(GrantRequest::new("carol", "project", &resource, "project.view", "admin"), &cancel)
        .await
        .unwrap();
    assert!(authz.has_permission("carol", "project", &resource, "project.view", &cancel).await.unwrap());
    assert_eq!(authz.revoke_all_for_resource("project", &resource, "admin", &cancel).await.unwrap(), 1);
    assert!(!authz.has_permission("carol", "project", &resource, "project.view", &cancel).await.unwrap());
}
