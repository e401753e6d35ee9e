// Authorization service: grants, ownership, roles, conditions and fail-closed denials

use crate::common::{mock_clock, sample_catalog, FailingStore};
use coordination_core::auth::{AuditLogger, AuthzEvent};
use coordination_core::core::clock::MockClock;
use coordination_core::core::models::{GrantRequest, Principal, ResourceContext};
use coordination_core::engine::AuthorizationService;
use coordination_core::state::keys;
use coordination_core::state::store::AtomicStore;
use coordination_core::state::InMemoryStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn service(store: Arc<dyn AtomicStore>, clock: &MockClock) -> AuthorizationService {
    let resolver = Arc::new(sample_catalog().permission_resolver().unwrap());
    AuthorizationService::new(store, resolver).with_clock(Arc::new(clock.clone()))
}

fn memory(clock: &MockClock) -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::with_clock(Arc::new(clock.clone())))
}

#[tokio::test]
async fn test_grant_revoke_round_trip_cleans_indices() {
    let clock = mock_clock();
    let store = memory(&clock);
    let authz = service(store.clone(), &clock);
    let cancel = CancellationToken::new();

    authz
        .grant_permission(GrantRequest::new("bob", "Project", "p1", "project.view", "alice"), &cancel)
        .await
        .unwrap();
    assert!(authz.has_permission("bob", "project", "p1", "project.view", &cancel).await.unwrap());
    assert_eq!(authz.user_permissions("bob", "project", "p1", &cancel).await.unwrap().len(), 1);
    assert_eq!(authz.resource_grants("project", "p1", &cancel).await.unwrap().len(), 1);

    let bob = Principal::new("bob");
    let view = authz
        .authorize(&bob, "project", "view", Some(&ResourceContext::new("p1")), &cancel)
        .await;
    assert!(view.succeeded);

    assert!(authz
        .revoke_permission("bob", "project", "p1", "project.view", "alice", &cancel)
        .await
        .unwrap());
    assert!(!authz.has_permission("bob", "project", "p1", "project.view", &cancel).await.unwrap());
    assert!(!store.exists(&keys::user_index_key("bob", "project", "p1")).await.unwrap());
    assert!(!store.exists(&keys::resource_index_key("project", "p1")).await.unwrap());

    // Revoking again is a no-op
    assert!(!authz
        .revoke_permission("bob", "project", "p1", "project.view", "alice", &cancel)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_owner_needs_no_grants() {
    let clock = mock_clock();
    let store = memory(&clock);
    store.set(&keys::owner_key("project", "p7"), "carol", None).await.unwrap();
    let authz = service(store, &clock);
    let cancel = CancellationToken::new();
    let resource = ResourceContext::new("p7");

    let owner = authz
        .authorize(&Principal::new("carol"), "project", "edit", Some(&resource), &cancel)
        .await;
    assert!(owner.succeeded);
    assert!(authz.is_owner("carol", "project", "p7", &cancel).await.unwrap());

    let stranger = authz
        .authorize(&Principal::new("dave"), "project", "edit", Some(&resource), &cancel)
        .await;
    assert!(!stranger.succeeded);
    assert_eq!(
        stranger.failure_reasons,
        vec!["Missing permission 'project.edit' on project 'p7'".to_string()]
    );
}

#[tokio::test]
async fn test_grant_expiry_is_honoured() {
    let clock = mock_clock();
    let authz = service(memory(&clock), &clock);
    let cancel = CancellationToken::new();
    let expires_at = clock_now(&clock) + chrono::Duration::hours(1);

    let grant = authz
        .grant_permission(
            GrantRequest::new("erin", "project", "p2", "project.view", "admin").expiring_at(expires_at),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(grant.expires_at, Some(expires_at));
    assert!(authz.has_permission("erin", "project", "p2", "project.view", &cancel).await.unwrap());

    clock.advance(Duration::from_secs(2 * 60 * 60));
    assert!(!authz.has_permission("erin", "project", "p2", "project.view", &cancel).await.unwrap());
    assert!(authz.resource_grants("project", "p2", &cancel).await.unwrap().is_empty());
}

fn clock_now(clock: &MockClock) -> chrono::DateTime<chrono::Utc> {
    use coordination_core::core::clock::Clock;
    clock.now()
}

#[tokio::test]
async fn test_minimum_role_and_condition() {
    let clock = mock_clock();
    let authz = service(memory(&clock), &clock);
    let cancel = CancellationToken::new();
    let resource = ResourceContext::new("p3").with_attributes(json!({"visibility": "private"}));

    let member = Principal::new("frank").with_roles(["member"]);
    let admin = Principal::new("gina").with_roles(["Admin"]);
    assert!(!authz.authorize(&member, "project", "delete", Some(&resource), &cancel).await.succeeded);
    assert!(authz.authorize(&admin, "project", "delete", Some(&resource), &cancel).await.succeeded);

    // The role is an alternative to a grant, not an extra gate
    authz
        .grant_permission(GrantRequest::new("frank", "project", "p3", "project.delete", "gina"), &cancel)
        .await
        .unwrap();
    assert!(authz.authorize(&member, "project", "delete", Some(&resource), &cancel).await.succeeded);
    let elsewhere = ResourceContext::new("p4");
    assert!(!authz.authorize(&member, "project", "delete", Some(&elsewhere), &cancel).await.succeeded);

    let denied = authz
        .authorize(&member, "project", "view_public", Some(&resource), &cancel)
        .await;
    assert_eq!(
        denied.failure_reasons,
        vec!["Condition not met for permission 'project.view_public': Project must be public".to_string()]
    );

    let public = ResourceContext::new("p3").with_attributes(json!({"visibility": "public"}));
    assert!(authz.authorize(&member, "project", "view_public", Some(&public), &cancel).await.succeeded);
}

#[tokio::test]
async fn test_store_outage_denies_with_system_error() {
    let clock = mock_clock();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let authz = service(Arc::new(FailingStore::down()), &clock).with_audit_logger(AuditLogger::with_sink(tx));

    let result = authz
        .authorize(
            &Principal::new("hank"),
            "project",
            "view",
            Some(&ResourceContext::new("p1")),
            &CancellationToken::new(),
        )
        .await;
    assert!(!result.succeeded);
    assert!(result.failure_reasons[0].starts_with("Authorization system error"));
    assert!(!result.failure_reasons[0].contains("os error"));

    match rx.try_recv().unwrap() {
        AuthzEvent::AccessDenied { system_error, .. } => assert!(system_error),
        other => panic!("unexpected audit event {:?}", other),
    }
}

#[tokio::test]
async fn test_cancelled_check_is_denied() {
    let clock = mock_clock();
    let authz = service(memory(&clock), &clock);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = authz
        .authorize(&Principal::new("ivy"), "project", "view", Some(&ResourceContext::new("p1")), &cancel)
        .await;
    assert!(!result.succeeded);
}

#[tokio::test]
async fn test_revoke_all_for_resource() {
    let clock = mock_clock();
    let store = memory(&clock);
    let authz = service(store.clone(), &clock);
    let cancel = CancellationToken::new();

    for (principal, permission) in [("a", "project.view"), ("b", "project.view"), ("b", "project.edit")] {
        authz
            .grant_permission(GrantRequest::new(principal, "project", "p9", permission, "root"), &cancel)
            .await
            .unwrap();
    }
    let grants = authz.resource_grants("project", "p9", &cancel).await.unwrap();
    let order: Vec<(&str, &str)> = grants
        .iter()
        .map(|g| (g.principal_id.as_str(), g.permission.as_str()))
        .collect();
    assert_eq!(order, vec![("a", "project.view"), ("b", "project.edit"), ("b", "project.view")]);

    assert_eq!(authz.revoke_all_for_resource("project", "p9", "root", &cancel).await.unwrap(), 3);
    assert!(authz.resource_grants("project", "p9", &cancel).await.unwrap().is_empty());
    assert!(!store.exists(&keys::user_index_key("b", "project", "p9")).await.unwrap());
}

#[tokio::test]
async fn test_revoke_all_handles_colons_in_permission_names() {
    let clock = mock_clock();
    let store = memory(&clock);
    let authz = service(store.clone(), &clock);
    let cancel = CancellationToken::new();

    authz
        .grant_permission(GrantRequest::new("bob", "document", "d1", "document:read", "root"), &cancel)
        .await
        .unwrap();
    assert!(authz.has_permission("bob", "document", "d1", "document:read", &cancel).await.unwrap());

    assert_eq!(authz.revoke_all_for_resource("document", "d1", "root", &cancel).await.unwrap(), 1);
    assert!(!authz.has_permission("bob", "document", "d1", "document:read", &cancel).await.unwrap());
    assert!(!store
        .exists(&keys::grant_key("bob", "document", "d1", "document:read"))
        .await
        .unwrap());
    assert!(!store.exists(&keys::user_index_key("bob", "document", "d1")).await.unwrap());
}
