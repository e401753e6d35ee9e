// Post-write stage: invalidation gated on the operation outcome

use crate::common::sample_catalog;
use coordination_core::cache::{CacheInvalidating, DistributedCache, InvalidationEngine, InvalidationStage};
use coordination_core::core::models::CacheEntryOptions;
use coordination_core::state::InMemoryStore;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct RenameTeam {
    always: bool,
}

impl CacheInvalidating for RenameTeam {
    fn invalidation_patterns(&self) -> Vec<String> {
        vec!["teams:*".to_string()]
    }

    fn invalidate_only_on_success(&self) -> bool {
        !self.always
    }
}

async fn setup() -> (InvalidationStage, Arc<DistributedCache>, CancellationToken) {
    let cache = Arc::new(DistributedCache::new(Arc::new(InMemoryStore::new())));
    let engine = InvalidationEngine::new(cache.clone(), Arc::new(sample_catalog().invalidation_catalog()));
    let cancel = CancellationToken::new();
    cache.set("teams:1", &json!({"name": "core"}), CacheEntryOptions::default(), &cancel).await.unwrap();
    (InvalidationStage::new(Arc::new(engine)), cache, cancel)
}

#[tokio::test]
async fn test_success_invalidates() {
    let (stage, cache, cancel) = setup().await;
    let outcome = stage
        .execute("RenameTeam", &RenameTeam { always: false }, || async { json!({"id": 1}) }, &cancel)
        .await;

    assert_eq!(outcome.report.map(|r| r.pattern_entries_removed), Some(1));
    assert!(!cache.exists("teams:1", &cancel).await.unwrap());
}

#[tokio::test]
async fn test_failure_leaves_cache_untouched() {
    let (stage, cache, cancel) = setup().await;
    let outcome = stage
        .execute(
            "RenameTeam",
            &RenameTeam { always: false },
            || async { json!({"isSuccess": false, "errors": ["name taken"]}) },
            &cancel,
        )
        .await;

    assert!(outcome.report.is_none());
    assert_eq!(outcome.output["errors"][0], "name taken");
    assert!(cache.exists("teams:1", &cancel).await.unwrap());
}

#[tokio::test]
async fn test_always_policy_invalidates_on_failure() {
    let (stage, cache, cancel) = setup().await;
    let outcome = stage
        .execute(
            "RenameTeam",
            &RenameTeam { always: true },
            || async { Err::<(), String>("conflict".to_string()) },
            &cancel,
        )
        .await;

    assert!(outcome.report.is_some());
    assert!(outcome.into_output().is_err());
    assert!(!cache.exists("teams:1", &cancel).await.unwrap());
}

#[tokio::test]
async fn test_ok_payload_reporting_failure_skips_invalidation() {
    let (stage, cache, cancel) = setup().await;
    let outcome = stage
        .execute(
            "RenameTeam",
            &RenameTeam { always: false },
            || async { Ok::<_, String>(json!({"errorCount": 2})) },
            &cancel,
        )
        .await;

    assert!(outcome.report.is_none());
    assert!(cache.exists("teams:1", &cancel).await.unwrap());

    let outcome = stage
        .execute(
            "RenameTeam",
            &RenameTeam { always: false },
            || async { Ok::<_, String>(json!({"id": 1})) },
            &cancel,
        )
        .await;
    assert!(outcome.report.is_some());
    assert!(!cache.exists("teams:1", &cancel).await.unwrap());
}
