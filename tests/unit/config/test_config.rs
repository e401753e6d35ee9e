// Configuration loading and thread-safety guarantees of shared services

use coordination_core::api::CoordinationState;
use coordination_core::cache::{DistributedCache, InvalidationEngine, InvalidationStage};
use coordination_core::config::Config;
use coordination_core::core::models::RateLimitAlgorithm;
use coordination_core::engine::{AuthorizationService, PermissionResolver, RateLimiter};
use coordination_core::state::{InMemoryStore, RedisAtomicStore, ResilientStore};
use static_assertions::assert_impl_all;
use std::env;

assert_impl_all!(InMemoryStore: Send, Sync);
assert_impl_all!(RedisAtomicStore: Send, Sync);
assert_impl_all!(ResilientStore: Send, Sync);
assert_impl_all!(RateLimiter: Send, Sync);
assert_impl_all!(DistributedCache: Send, Sync);
assert_impl_all!(InvalidationEngine: Send, Sync);
assert_impl_all!(InvalidationStage: Send, Sync, Clone);
assert_impl_all!(AuthorizationService: Send, Sync);
assert_impl_all!(PermissionResolver: Send, Sync);
assert_impl_all!(CoordinationState: Send, Sync, Clone);

const VARS: &[&str] = &[
    "REDIS_URL",
    "RATE_LIMIT_ALGORITHM",
    "RATE_LIMIT_DEFAULT_LIMIT",
    "STORE_FALLBACK_ENABLED",
    "EDGE_PURGE_URL",
    "CACHE_KEY_PREFIX",
];

// Only test in this binary that touches these variables
#[test]
fn test_from_env_overrides_and_rejections() {
    env::set_var("REDIS_URL", "redis://cache.internal:6380/2");
    env::set_var("RATE_LIMIT_ALGORITHM", "fixed");
    env::set_var("RATE_LIMIT_DEFAULT_LIMIT", "25");
    env::set_var("STORE_FALLBACK_ENABLED", "false");
    env::set_var("EDGE_PURGE_URL", "https://cdn.example.com/purge");

    let config = Config::from_env().unwrap();
    assert_eq!(config.redis_url, "redis://cache.internal:6380/2");
    assert_eq!(config.redis_connection_timeout_secs, 5);
    assert_eq!(config.rate_limit_algorithm, RateLimitAlgorithm::FixedWindow);
    assert_eq!(config.rate_limit_default_limit, 25);
    assert!(!config.store_fallback_enabled);
    assert_eq!(config.edge_purge_url.as_deref(), Some("https://cdn.example.com/purge"));

    env::set_var("RATE_LIMIT_DEFAULT_LIMIT", "0");
    assert!(Config::from_env().is_err());
    env::set_var("RATE_LIMIT_DEFAULT_LIMIT", "25");

    env::set_var("CACHE_KEY_PREFIX", "ratelimit:");
    assert!(Config::from_env().is_err(), "colliding prefixes must be rejected");

    for var in VARS {
        env::remove_var(var);
    }
}
