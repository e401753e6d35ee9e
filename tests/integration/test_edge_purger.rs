// HTTP front-door purge against a mock endpoint

use crate::common::sample_catalog;
use coordination_core::cache::{DistributedCache, EdgeCache, HttpEdgePurger, InvalidationEngine};
use coordination_core::core::errors::CoordinationError;
use coordination_core::core::models::CacheEntryOptions;
use coordination_core::state::InMemoryStore;
use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn paths(items: &[&str]) -> Vec<String> {
    items.iter().map(|p| p.to_string()).collect()
}

#[tokio::test]
async fn test_purge_posts_paths() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/purge")
        .match_body(Matcher::Json(json!({"paths": ["/api/projects", "/gateway/core/projects"]})))
        .with_status(200)
        .create_async()
        .await;

    let purger = HttpEdgePurger::new(format!("{}/purge", server.url())).unwrap();
    let purged = purger
        .purge(&paths(&["/api/projects", "/gateway/core/projects"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(purged, 2);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_purge_rejection_is_edge_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server.mock("POST", "/purge").with_status(500).create_async().await;

    let purger = HttpEdgePurger::new(format!("{}/purge", server.url())).unwrap();
    let err = purger
        .purge(&paths(&["/api/projects"]), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CoordinationError::EdgePurgeError(ref detail) if detail == "HTTP 500"));
}

#[tokio::test]
async fn test_empty_path_list_sends_nothing() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("POST", "/purge").expect(0).create_async().await;

    let purger = HttpEdgePurger::new(format!("{}/purge", server.url())).unwrap();
    assert_eq!(purger.purge(&[], &CancellationToken::new()).await.unwrap(), 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_engine_reports_failed_purge_and_still_clears_cache() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server.mock("POST", "/purge").with_status(503).create_async().await;

    let cache = Arc::new(DistributedCache::new(Arc::new(InMemoryStore::new())));
    let engine = InvalidationEngine::new(cache.clone(), Arc::new(sample_catalog().invalidation_catalog()))
        .with_edge_cache(Arc::new(HttpEdgePurger::new(format!("{}/purge", server.url())).unwrap()));
    let cancel = CancellationToken::new();
    cache.set("project:3", &json!({}), CacheEntryOptions::default(), &cancel).await.unwrap();

    let report = engine
        .invalidate_trigger(
            "UpdateProject",
            |field| (field == "ProjectId").then(|| "3".to_string()),
            &cancel,
        )
        .await;

    assert_eq!(report.keys_removed, 1);
    assert_eq!(report.edge_paths.len(), 2);
    assert_eq!(report.edge_entries_removed, 0);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("edge http"));
}
