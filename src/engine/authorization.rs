// Resource-level authorization: grants, ownership and the decision algorithm

use crate::auth::audit_logger::{AuditLogger, AuthzEvent};
use crate::config::Config;
use crate::core::clock::{checked_add, Clock, SystemClock};
use crate::core::errors::CoordinationError;
use crate::core::guard::guarded;
use crate::core::metrics::CoordinationMetrics;
use crate::core::models::{
    AuthorizationResult, FailurePolicy, GrantRequest, PermissionDefinition, PermissionGrant, Principal,
    ResourceContext,
};
use crate::engine::conditions::ConditionEvaluator;
use crate::engine::permissions::PermissionResolver;
use crate::state::keys;
use crate::state::store::{duration_millis, expect_reply, AtomicStore, StoreScript};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_GRANT_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(500);

/// Authorization service over the shared store.
///
/// Grants live under `auth:permission:*` with two reverse indices kept in the
/// same atomic script. Ownership (`auth:owner:*`) is read-only here and is
/// never stored as a grant. Store faults during a decision follow
/// `failure_policy`, which defaults to fail-closed.
pub struct AuthorizationService {
    store: Arc<dyn AtomicStore>,
    resolver: Arc<PermissionResolver>,
    clock: Arc<dyn Clock>,
    operation_timeout: Duration,
    default_grant_ttl: Duration,
    failure_policy: FailurePolicy,
    audit: AuditLogger,
    metrics: Option<Arc<CoordinationMetrics>>,
}

impl AuthorizationService {
    pub fn new(store: Arc<dyn AtomicStore>, resolver: Arc<PermissionResolver>) -> Self {
        Self {
            store,
            resolver,
            clock: Arc::new(SystemClock::new()),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            default_grant_ttl: DEFAULT_GRANT_TTL,
            failure_policy: FailurePolicy::FailClosed,
            audit: AuditLogger::new(),
            metrics: None,
        }
    }

    pub fn from_config(store: Arc<dyn AtomicStore>, resolver: Arc<PermissionResolver>, config: &Config) -> Self {
        Self::new(store, resolver)
            .with_operation_timeout(Duration::from_millis(config.redis_operation_timeout_ms))
            .with_default_grant_ttl(Duration::from_secs(config.grant_default_ttl_days.saturating_mul(24 * 60 * 60)))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_default_grant_ttl(mut self, ttl: Duration) -> Self {
        self.default_grant_ttl = ttl;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_audit_logger(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<CoordinationMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Decide whether `principal` may perform `action` on a resource of `resource_type`.
    ///
    /// 1. No definitions registered for the action: authorized.
    /// 2. Each required definition is satisfied by ownership (owner
    ///    permissions), by role, or by a live grant on the resource. A
    ///    definition with a `minimum_role` is satisfied outright by a principal
    ///    holding that role or a higher one, with no grant needed; principals
    ///    below it still pass with a grant.
    /// 3. Otherwise a conditional definition evaluates its condition against
    ///    the resource attributes; an unconditional one is missing.
    /// 4. Every failure is collected; authorized iff none were recorded.
    pub async fn authorize(
        &self,
        principal: &Principal,
        resource_type: &str,
        action: &str,
        resource: Option<&ResourceContext>,
        cancel: &CancellationToken,
    ) -> AuthorizationResult {
        let required = self.resolver.required_for(resource_type, action);
        if required.is_empty() {
            debug!(resource_type, action, "No permissions registered for action");
            self.record("granted");
            return AuthorizationResult::success();
        }

        let outcome = guarded(
            cancel,
            self.operation_timeout,
            self.evaluate(principal, resource_type, &required, resource),
        )
        .await;

        match outcome {
            Ok(reasons) if reasons.is_empty() => {
                self.record("granted");
                AuthorizationResult::success()
            }
            Ok(reasons) => {
                self.record("denied");
                self.audit.log(AuthzEvent::AccessDenied {
                    principal_id: principal.id.clone(),
                    resource_type: resource_type.to_string(),
                    action: action.to_string(),
                    resource_id: resource.map(|r| r.id.clone()),
                    reasons: reasons.clone(),
                    system_error: false,
                });
                AuthorizationResult::failure(reasons)
            }
            Err(e) => self.degraded(principal, resource_type, action, resource, &e),
        }
    }

    async fn evaluate(
        &self,
        principal: &Principal,
        resource_type: &str,
        required: &[&PermissionDefinition],
        resource: Option<&ResourceContext>,
    ) -> Result<Vec<String>, CoordinationError> {
        let scope = scope(resource_type);
        let now = self.clock.now();

        let is_owner = match resource {
            Some(resource) if required.iter().any(|d| d.satisfied_by_ownership()) => {
                self.owner_of(&scope, &resource.id).await?.as_deref() == Some(principal.id.as_str())
            }
            _ => false,
        };
        let attributes = resource.map(|r| &r.attributes).unwrap_or(&Value::Null);

        let mut reasons = Vec::new();
        for definition in required {
            if is_owner && definition.satisfied_by_ownership() {
                continue;
            }
            if let Some(minimum) = &definition.minimum_role {
                if self.resolver.roles().satisfies(&principal.roles, minimum) {
                    continue;
                }
            }
            if let Some(resource) = resource {
                if self
                    .live_grant(&principal.id, &scope, &resource.id, &definition.name, now)
                    .await?
                    .is_some()
                {
                    continue;
                }
            }

            if definition.requires_condition() {
                let met = definition
                    .condition
                    .as_ref()
                    .map_or(false, |c| ConditionEvaluator::evaluate(c, attributes, principal));
                if !met {
                    reasons.push(format!(
                        "Condition not met for permission '{}': {}",
                        definition.name,
                        definition
                            .condition_description
                            .as_deref()
                            .unwrap_or("resource does not satisfy the permission condition")
                    ));
                }
            } else {
                reasons.push(format!(
                    "Missing permission '{}' on {} '{}'",
                    definition.name,
                    resource_type,
                    resource.map_or("*", |r| r.id.as_str())
                ));
            }
        }
        Ok(reasons)
    }

    fn degraded(
        &self,
        principal: &Principal,
        resource_type: &str,
        action: &str,
        resource: Option<&ResourceContext>,
        error: &CoordinationError,
    ) -> AuthorizationResult {
        self.record("error");
        match self.failure_policy {
            FailurePolicy::FailClosed => {
                let result = AuthorizationResult::system_error(&error.user_message());
                self.audit.log(AuthzEvent::AccessDenied {
                    principal_id: principal.id.clone(),
                    resource_type: resource_type.to_string(),
                    action: action.to_string(),
                    resource_id: resource.map(|r| r.id.clone()),
                    reasons: result.failure_reasons.clone(),
                    system_error: true,
                });
                result
            }
            FailurePolicy::FailOpen => {
                warn!(
                    principal_id = %principal.id,
                    resource_type,
                    action,
                    error = %error,
                    "Authorization store unavailable, allowing request (fail-open)"
                );
                AuthorizationResult::success()
            }
        }
    }

    /// Write a grant and both index entries in one atomic step
    pub async fn grant_permission(
        &self,
        request: GrantRequest,
        cancel: &CancellationToken,
    ) -> Result<PermissionGrant, CoordinationError> {
        for (field, value) in [
            ("principal_id", &request.principal_id),
            ("resource_type", &request.resource_type),
            ("resource_id", &request.resource_id),
            ("permission", &request.permission),
            ("granted_by", &request.granted_by),
        ] {
            if value.trim().is_empty() {
                return Err(CoordinationError::InvalidArgument(format!("{} must not be empty", field)));
            }
        }

        let now = self.clock.now();
        let expires_at = match request.expires_at {
            Some(at) if at <= now => {
                return Err(CoordinationError::InvalidArgument(format!(
                    "expires_at {} is already in the past",
                    at
                )))
            }
            Some(at) => at,
            None => checked_add(now, self.default_grant_ttl).ok_or_else(|| {
                CoordinationError::InvalidArgument(format!(
                    "Default grant lifetime of {}s overflows the expiry time",
                    self.default_grant_ttl.as_secs()
                ))
            })?,
        };
        let ttl = (expires_at - now)
            .to_std()
            .map_err(|e| CoordinationError::InvalidArgument(format!("Invalid grant lifetime: {}", e)))?;

        let scope = scope(&request.resource_type);
        let grant = PermissionGrant {
            principal_id: request.principal_id,
            resource_type: scope.clone(),
            resource_id: request.resource_id,
            permission: request.permission,
            granted_by: request.granted_by,
            granted_at: now,
            expires_at: Some(expires_at),
            is_active: true,
        };
        let record = serde_json::to_string(&grant)?;
        let grant_key = keys::grant_key(&grant.principal_id, &scope, &grant.resource_id, &grant.permission);

        let reply = guarded(
            cancel,
            self.operation_timeout,
            self.store.execute_atomic(
                StoreScript::GrantPermission,
                &[
                    grant_key.clone(),
                    keys::user_index_key(&grant.principal_id, &scope, &grant.resource_id),
                    keys::resource_index_key(&scope, &grant.resource_id),
                ],
                &[record, duration_millis(ttl).to_string(), grant_key],
            ),
        )
        .await?;
        expect_reply::<1>(StoreScript::GrantPermission, &reply)?;

        self.audit.log(AuthzEvent::GrantIssued {
            principal_id: grant.principal_id.clone(),
            resource_type: grant.resource_type.clone(),
            resource_id: grant.resource_id.clone(),
            permission: grant.permission.clone(),
            granted_by: grant.granted_by.clone(),
            expires_at,
        });
        Ok(grant)
    }

    /// Remove a grant and both index entries in one atomic step; false when no grant existed
    pub async fn revoke_permission(
        &self,
        principal_id: &str,
        resource_type: &str,
        resource_id: &str,
        permission: &str,
        revoked_by: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, CoordinationError> {
        let scope = scope(resource_type);
        let existed = guarded(
            cancel,
            self.operation_timeout,
            self.revoke_key(principal_id, &scope, resource_id, permission),
        )
        .await?;

        self.audit.log(AuthzEvent::GrantRevoked {
            principal_id: principal_id.to_string(),
            resource_type: scope,
            resource_id: resource_id.to_string(),
            permission: permission.to_string(),
            revoked_by: revoked_by.to_string(),
            existed,
        });
        Ok(existed)
    }

    async fn revoke_key(
        &self,
        principal_id: &str,
        scope: &str,
        resource_id: &str,
        permission: &str,
    ) -> Result<bool, CoordinationError> {
        let grant_key = keys::grant_key(principal_id, scope, resource_id, permission);
        let reply = self
            .store
            .execute_atomic(
                StoreScript::RevokePermission,
                &[
                    grant_key.clone(),
                    keys::user_index_key(principal_id, scope, resource_id),
                    keys::resource_index_key(scope, resource_id),
                ],
                &[grant_key],
            )
            .await?;
        let [removed] = expect_reply::<1>(StoreScript::RevokePermission, &reply)?;
        Ok(removed > 0)
    }

    /// Live explicit grant check (ownership not consulted)
    pub async fn has_permission(
        &self,
        principal_id: &str,
        resource_type: &str,
        resource_id: &str,
        permission: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, CoordinationError> {
        let now = self.clock.now();
        let grant = guarded(
            cancel,
            self.operation_timeout,
            self.live_grant(principal_id, &scope(resource_type), resource_id, permission, now),
        )
        .await?;
        Ok(grant.is_some())
    }

    pub async fn is_owner(
        &self,
        principal_id: &str,
        resource_type: &str,
        resource_id: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, CoordinationError> {
        let owner = guarded(
            cancel,
            self.operation_timeout,
            self.owner_of(&scope(resource_type), resource_id),
        )
        .await?;
        Ok(owner.as_deref() == Some(principal_id))
    }

    /// Live grants a principal holds on one resource, ordered by permission
    pub async fn user_permissions(
        &self,
        principal_id: &str,
        resource_type: &str,
        resource_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PermissionGrant>, CoordinationError> {
        let index = keys::user_index_key(principal_id, &scope(resource_type), resource_id);
        let mut grants = guarded(cancel, self.operation_timeout, self.indexed_grants(&index)).await?;
        grants.sort_by(|a, b| a.permission.cmp(&b.permission));
        Ok(grants)
    }

    /// Live grants on one resource, ordered by principal then permission
    pub async fn resource_grants(
        &self,
        resource_type: &str,
        resource_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PermissionGrant>, CoordinationError> {
        let index = keys::resource_index_key(&scope(resource_type), resource_id);
        let mut grants = guarded(cancel, self.operation_timeout, self.indexed_grants(&index)).await?;
        grants.sort_by(|a, b| {
            a.principal_id
                .cmp(&b.principal_id)
                .then_with(|| a.permission.cmp(&b.permission))
        });
        Ok(grants)
    }

    /// Revoke every grant indexed under a resource (resource deletion); returns grants removed
    pub async fn revoke_all_for_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
        revoked_by: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, CoordinationError> {
        let scope = scope(resource_type);
        let index = keys::resource_index_key(&scope, resource_id);
        let members = guarded(cancel, self.operation_timeout, self.store.set_members(&index)).await?;

        let mut removed = 0u64;
        for member in &members {
            let Some((principal_id, permission)) = keys::split_grant_key(member, &scope, resource_id) else {
                warn!(index = %index, member = %member, "Unrecognised grant index member, removing");
                guarded(cancel, self.operation_timeout, self.store.delete(member)).await?;
                continue;
            };

            let existed = guarded(
                cancel,
                self.operation_timeout,
                self.revoke_key(principal_id, &scope, resource_id, permission),
            )
            .await?;
            if existed {
                removed += 1;
                self.audit.log(AuthzEvent::GrantRevoked {
                    principal_id: principal_id.to_string(),
                    resource_type: scope.clone(),
                    resource_id: resource_id.to_string(),
                    permission: permission.to_string(),
                    revoked_by: revoked_by.to_string(),
                    existed,
                });
            }
        }

        guarded(cancel, self.operation_timeout, self.store.delete(&index)).await?;
        Ok(removed)
    }

    async fn owner_of(&self, scope: &str, resource_id: &str) -> Result<Option<String>, CoordinationError> {
        self.store.get(&keys::owner_key(scope, resource_id)).await
    }

    async fn live_grant(
        &self,
        principal_id: &str,
        scope: &str,
        resource_id: &str,
        permission: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PermissionGrant>, CoordinationError> {
        let key = keys::grant_key(principal_id, scope, resource_id, permission);
        Ok(self.read_grant(&key).await?.filter(|grant| grant.is_live(now)))
    }

    /// A record that no longer decodes counts as absent
    async fn read_grant(&self, key: &str) -> Result<Option<PermissionGrant>, CoordinationError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<PermissionGrant>(&raw) {
            Ok(grant) => Ok(Some(grant)),
            Err(e) => {
                warn!(key, error = %e, "Grant record is corrupted, treating as absent");
                Ok(None)
            }
        }
    }

    async fn indexed_grants(&self, index: &str) -> Result<Vec<PermissionGrant>, CoordinationError> {
        let now = self.clock.now();
        let mut grants = Vec::new();
        for member in self.store.set_members(index).await? {
            if let Some(grant) = self.read_grant(&member).await?.filter(|g| g.is_live(now)) {
                grants.push(grant);
            }
        }
        Ok(grants)
    }

    fn record(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_authorization(outcome);
        }
    }
}

/// Resource types are case-insensitive; keys use the lowercase spelling
fn scope(resource_type: &str) -> String {
    resource_type.to_lowercase()
}
