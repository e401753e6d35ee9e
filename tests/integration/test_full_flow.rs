// Authorize, write, invalidate: one request lifecycle over the wired state

use crate::common::test_state;
use coordination_core::cache::{CacheInvalidating, InvalidationStage, StoreEdgeCache};
use coordination_core::core::errors::CoordinationError;
use coordination_core::core::models::{CacheEntryOptions, GrantRequest, Principal, ResourceContext};
use coordination_core::state::store::AtomicStore;
use coordination_core::state::InMemoryStore;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct UpdateProject {
    project_id: String,
}

impl CacheInvalidating for UpdateProject {
    fn invalidation_patterns(&self) -> Vec<String> {
        Vec::new()
    }

    fn resolve_field(&self, name: &str) -> Option<String> {
        (name == "ProjectId").then(|| self.project_id.clone())
    }
}

#[tokio::test]
async fn test_authorized_update_clears_internal_and_edge_entries() {
    let store = Arc::new(InMemoryStore::new());
    let state = test_state(store.clone());
    let cancel = CancellationToken::new();

    state
        .authorization
        .grant_permission(GrantRequest::new("bob", "project", "p1", "project.edit", "alice"), &cancel)
        .await
        .unwrap();

    let loaded: Value = state
        .cache
        .get_or_set(
            "project:p1",
            CacheEntryOptions::default().with_tags(["project:p1"]),
            || async { Ok::<_, CoordinationError>(json!({"name": "apollo"})) },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(loaded["name"], "apollo");
    state.cache.set("projects:list:1", &json!(["p1"]), CacheEntryOptions::default(), &cancel).await.unwrap();

    let edge = StoreEdgeCache::new(store.clone());
    edge.put("/api/projects", "etag-1", "[]", Duration::from_secs(60), &cancel).await.unwrap();
    edge.put("/api/projects/p1", "etag-2", "{}", Duration::from_secs(60), &cancel).await.unwrap();
    edge.put("/api/projectsarchive", "etag-3", "[]", Duration::from_secs(60), &cancel).await.unwrap();

    let principal = Principal::new("bob").with_roles(["member"]);
    let decision = state
        .authorization
        .authorize(&principal, "project", "edit", Some(&ResourceContext::new("p1")), &cancel)
        .await;
    assert!(decision.succeeded, "{:?}", decision.failure_reasons);

    let stage = InvalidationStage::new(state.invalidation.clone());
    let outcome = stage
        .execute(
            "UpdateProject",
            &UpdateProject { project_id: "p1".to_string() },
            || async { json!({"success": true, "id": "p1"}) },
            &cancel,
        )
        .await;

    let report = outcome.report.expect("successful write invalidates");
    assert!(report.is_clean(), "{:?}", report.errors);
    assert_eq!(report.keys_removed, 1);
    assert_eq!(report.pattern_entries_removed, 1);
    assert_eq!(report.edge_entries_removed, 2);
    assert!(!state.cache.exists("project:p1", &cancel).await.unwrap());
    assert!(store
        .scan_prefix("edge:/api/projectsarchive")
        .await
        .map(|keys| keys.len() == 1)
        .unwrap());

    // Next read rebuilds
    let rebuilt: Value = state
        .cache
        .get_or_set(
            "project:p1",
            CacheEntryOptions::default(),
            || async { Ok::<_, CoordinationError>(json!({"name": "apollo-2"})) },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(rebuilt["name"], "apollo-2");
}

#[tokio::test]
async fn test_rate_limit_status_and_reset_through_state() {
    let state = test_state(Arc::new(InMemoryStore::new()));
    let cancel = CancellationToken::new();
    let limiter = &state.rate_limiter;
    let window = Duration::from_secs(60);
    let algorithm = state.config.rate_limit_algorithm;

    for _ in 0..3 {
        assert!(limiter.check_and_increment("login:bob", 3, window, algorithm, &cancel).await.allowed);
    }
    assert!(!limiter.check_and_increment("login:bob", 3, window, algorithm, &cancel).await.allowed);

    let status = limiter.status("login:bob", 3, window, algorithm, &cancel).await;
    assert_eq!(status.current_count, 3);
    assert_eq!(status.remaining, 0);

    assert!(limiter.reset("login:bob", &cancel).await.unwrap());
    assert!(limiter.check_and_increment("login:bob", 3, window, algorithm, &cancel).await.allowed);
}
