// Core data models shared by the rate limiter, cache and authorization service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::core::errors::CoordinationError;

/// What an operation returns when its own dependency fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Default to allow (rate limiting)
    FailOpen,
    /// Default to deny (authorization)
    FailClosed,
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// Window counting algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    /// Trailing interval over a timestamp set
    SlidingWindow,
    /// Single counter reset `window` after the first hit
    FixedWindow,
}

impl FromStr for RateLimitAlgorithm {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sliding" | "sliding_window" => Ok(RateLimitAlgorithm::SlidingWindow),
            "fixed" | "fixed_window" => Ok(RateLimitAlgorithm::FixedWindow),
            other => Err(CoordinationError::ConfigurationError(format!(
                "Unknown rate limit algorithm '{}': must be 'sliding' or 'fixed'",
                other
            ))),
        }
    }
}

impl fmt::Display for RateLimitAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitAlgorithm::SlidingWindow => write!(f, "sliding"),
            RateLimitAlgorithm::FixedWindow => write!(f, "fixed"),
        }
    }
}

/// Limit and window for one key in a batch check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub limit: u64,
    pub window: Duration,
}

impl RateLimitRule {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// Outcome of a rate limit check, identical for both algorithms
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub current_count: u64,
    pub limit: u64,
    pub reset_time: DateTime<Utc>,
    pub remaining: u64,
}

impl RateLimitResult {
    pub fn new(allowed: bool, current_count: u64, limit: u64, reset_time: DateTime<Utc>) -> Self {
        Self {
            allowed,
            current_count,
            limit,
            reset_time,
            remaining: limit.saturating_sub(current_count),
        }
    }

    /// Seconds until the window resets, rounded up, never negative
    pub fn retry_after(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_time - now).num_milliseconds();
        if millis <= 0 {
            0
        } else {
            ((millis as u64) + 999) / 1000
        }
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Relative importance of a cache entry (recorded with the entry, opaque to the store)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePriority {
    Low,
    #[default]
    Normal,
    High,
    NeverRemove,
}

/// How long an entry lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheExpiration {
    /// Use the cache's configured default TTL
    #[default]
    Default,
    /// Fixed lifetime from the moment of the write
    Absolute(Duration),
    /// Lifetime renewed on every read
    Sliding(Duration),
    /// No TTL, removed only by invalidation
    Never,
}

/// Options for a cache write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheEntryOptions {
    pub tags: Vec<String>,
    pub priority: CachePriority,
    pub expiration: CacheExpiration,
}

impl CacheEntryOptions {
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: CachePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_expiration(mut self, expiration: CacheExpiration) -> Self {
        self.expiration = expiration;
        self
    }
}

/// Logical cache key, optionally scoped to a region
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub region: Option<String>,
    pub key: String,
}

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            region: None,
            key: key.into(),
        }
    }

    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Key as seen by pattern matching: `{region}:{key}` or `{key}`
    pub fn logical(&self) -> String {
        match &self.region {
            Some(region) => format!("{}:{}", region, self.key),
            None => self.key.clone(),
        }
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        CacheKey::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        CacheKey::new(key)
    }
}

/// Kind of bulk removal a rule performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationType {
    Key,
    Pattern,
    Tag,
}

/// Catalog rule: when `trigger` completes, clear `key_pattern` and `tags`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationRule {
    pub trigger: String,
    #[serde(default)]
    pub key_pattern: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub invalidation_type: InvalidationType,
}

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

/// Permission category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionCategory {
    Standard,
    Owner,
    Conditional,
    Administrative,
    System,
}

/// Declarative condition evaluated against resource attributes
///
/// Fields are dotted paths into the resource attributes (`team.lead_id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PermissionCondition {
    FieldEquals { field: String, value: serde_json::Value },
    FieldIn { field: String, values: Vec<serde_json::Value> },
    FieldPresent { field: String },
    /// Attribute equals the acting principal's id
    FieldMatchesPrincipal { field: String },
    All { conditions: Vec<PermissionCondition> },
    Any { conditions: Vec<PermissionCondition> },
    Not { condition: Box<PermissionCondition> },
}

/// Registered permission for a resource type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionDefinition {
    pub name: String,
    pub resource_type: String,
    #[serde(default)]
    pub actions: Vec<String>,
    pub category: PermissionCategory,
    #[serde(default)]
    pub is_owner_permission: bool,
    #[serde(default)]
    pub is_conditional: bool,
    #[serde(default)]
    pub condition: Option<PermissionCondition>,
    #[serde(default)]
    pub condition_description: Option<String>,
    #[serde(default)]
    pub minimum_role: Option<String>,
}

impl PermissionDefinition {
    pub fn new(
        name: impl Into<String>,
        resource_type: impl Into<String>,
        actions: &[&str],
        category: PermissionCategory,
    ) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
            category,
            is_owner_permission: category == PermissionCategory::Owner,
            is_conditional: category == PermissionCategory::Conditional,
            condition: None,
            condition_description: None,
            minimum_role: None,
        }
    }

    pub fn with_condition(mut self, condition: PermissionCondition, description: impl Into<String>) -> Self {
        self.is_conditional = true;
        self.condition = Some(condition);
        self.condition_description = Some(description.into());
        self
    }

    pub fn with_minimum_role(mut self, role: impl Into<String>) -> Self {
        self.minimum_role = Some(role.into());
        self
    }

    /// Owners of the resource hold this permission implicitly
    pub fn satisfied_by_ownership(&self) -> bool {
        self.is_owner_permission || self.category == PermissionCategory::Owner
    }

    pub fn requires_condition(&self) -> bool {
        self.is_conditional || self.category == PermissionCategory::Conditional
    }
}

/// Time-bounded grant of one permission on one resource to one principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub principal_id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub permission: String,
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl PermissionGrant {
    /// Active and not past its expiry
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |expires| expires > now)
    }
}

/// Input for a grant write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRequest {
    pub principal_id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub permission: String,
    pub granted_by: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl GrantRequest {
    pub fn new(
        principal_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        permission: impl Into<String>,
        granted_by: impl Into<String>,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            permission: permission.into(),
            granted_by: granted_by.into(),
            expires_at: None,
        }
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Acting identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }
}

/// Resource under evaluation: its id plus attributes for conditional permissions
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceContext {
    pub id: String,
    pub attributes: serde_json::Value,
}

impl ResourceContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: serde_json::Value::Null,
        }
    }

    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Authorization decision with every failure reason collected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationResult {
    pub succeeded: bool,
    pub failure_reasons: Vec<String>,
}

impl AuthorizationResult {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            failure_reasons: Vec::new(),
        }
    }

    pub fn failure(reasons: Vec<String>) -> Self {
        Self {
            succeeded: reasons.is_empty(),
            failure_reasons: reasons,
        }
    }

    /// Denial caused by the authorization service's own dependency
    pub fn system_error(detail: &str) -> Self {
        Self {
            succeeded: false,
            failure_reasons: vec![format!("Authorization system error: {}", detail)],
        }
    }
}
