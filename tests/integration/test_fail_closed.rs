// Store outage through the router: limiter admits, authorization denies

use crate::common::{sample_catalog, test_state, FailingStore};
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use coordination_core::api::{create_router, CoordinationState};
use coordination_core::cache::InvalidationBatch;
use coordination_core::config::Config;
use coordination_core::core::metrics::CoordinationMetrics;
use coordination_core::core::models::{CacheEntryOptions, GrantRequest, Principal, RateLimitAlgorithm, ResourceContext};
use coordination_core::state::store::AtomicStore;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

#[tokio::test]
async fn test_outage_admits_requests_but_denies_access() {
    let store = Arc::new(FailingStore::down());
    let state = test_state(store.clone());
    let metrics = state.metrics.clone();
    let app = create_router(state);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/authorize")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-principal-id", "bob")
        .body(Body::from(
            json!({"principal_id": "bob", "resource_type": "project", "action": "view", "resource_id": "p1"})
                .to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    // Rate limiter failed open, so the handler ran and denied
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!response.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(metrics.rate_limit_count("degraded"), 1);

    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    let reason = body["reasons"][0].as_str().unwrap();
    assert!(reason.starts_with("Authorization system error"), "{}", reason);
    assert!(!reason.contains("os error"));
    assert!(store.call_count() >= 2);
}

#[tokio::test]
async fn test_fallback_wiring_degrades_only_the_limiter() {
    let primary = Arc::new(FailingStore::new());
    let config = Config::test_config();
    assert!(config.store_fallback_enabled);
    let metrics = Arc::new(CoordinationMetrics::new().unwrap());
    let state = CoordinationState::with_primary_store(config, primary.clone(), &sample_catalog(), metrics.clone())
        .unwrap();
    let cancel = CancellationToken::new();

    state
        .authorization
        .grant_permission(GrantRequest::new("bob", "project", "p1", "project.view", "alice"), &cancel)
        .await
        .unwrap();
    state
        .cache
        .set("project:p1", &json!({"name": "apollo"}), CacheEntryOptions::default(), &cancel)
        .await
        .unwrap();

    primary.set_down(true);

    let limited = state
        .rate_limiter
        .check_and_increment("bob:/v1/authorize", 5, Duration::from_secs(60), RateLimitAlgorithm::SlidingWindow, &cancel)
        .await;
    assert!(limited.allowed);
    assert_eq!(limited.current_count, 1);
    assert_eq!(metrics.fallback_count("sliding_window"), 1);

    let decision = state
        .authorization
        .authorize(&Principal::new("bob"), "project", "view", Some(&ResourceContext::new("p1")), &cancel)
        .await;
    assert!(!decision.succeeded);
    assert!(decision.failure_reasons[0].starts_with("Authorization system error"));

    let revoked = state
        .authorization
        .revoke_permission("bob", "project", "p1", "project.view", "alice", &cancel)
        .await;
    assert!(revoked.is_err());

    let report = state
        .invalidation
        .invalidate_batch(InvalidationBatch::default().keys(["project:p1"]), &cancel)
        .await;
    assert!(!report.is_clean());
    assert!(state.cache.get::<Value>("project:p1", &cancel).await.is_err());

    // Nothing was written to or removed from the in-process fallback on the primary's behalf
    primary.set_down(false);
    assert!(state
        .authorization
        .has_permission("bob", "project", "p1", "project.view", &cancel)
        .await
        .unwrap());
    assert!(primary.exists("cache:project:p1").await.unwrap());
    assert_eq!(state.store.backend_name(), "failing");
}
