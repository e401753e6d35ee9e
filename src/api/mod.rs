// Axum surface: shared state, rate-limit stage and admin endpoints

use axum::{error_handling::HandleErrorLayer, http::StatusCode, routing::get, routing::post, BoxError, Router};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tracing::{info, warn};

pub mod handlers;
pub mod middleware;
pub mod responses;

use crate::cache::distributed::DistributedCache;
use crate::cache::edge::{EdgeCache, HttpEdgePurger, StoreEdgeCache};
use crate::cache::invalidation::InvalidationEngine;
use crate::config::Config;
use crate::core::errors::CoordinationError;
use crate::core::metrics::CoordinationMetrics;
use crate::engine::authorization::AuthorizationService;
use crate::engine::rate_limiter::RateLimiter;
use crate::loader::catalog_loader::CatalogLoader;
use crate::state::memory_store::InMemoryStore;
use crate::state::redis_store::RedisAtomicStore;
use crate::state::resilient_store::ResilientStore;
use crate::state::store::AtomicStore;

/// Shared dependencies of the coordination core
///
/// All components are behind `Arc`; cloning the state is cheap.
#[derive(Clone)]
pub struct CoordinationState {
    pub config: Arc<Config>,
    pub store: Arc<dyn AtomicStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cache: Arc<DistributedCache>,
    pub invalidation: Arc<InvalidationEngine>,
    pub authorization: Arc<AuthorizationService>,
    pub metrics: Arc<CoordinationMetrics>,
}

impl CoordinationState {
    /// Connect to the shared store and wire every service from config.
    pub async fn from_config(config: Config) -> Result<Self, CoordinationError> {
        let metrics = Arc::new(CoordinationMetrics::new()?);
        let catalog = match &config.catalog_path {
            Some(path) => CatalogLoader::from_file(path)?,
            None => {
                warn!("No catalog configured: no permissions registered, no invalidation rules");
                CatalogLoader::empty()
            }
        };

        let redis: Arc<dyn AtomicStore> = Arc::new(RedisAtomicStore::from_config(&config).await?);
        Self::with_primary_store(config, redis, &catalog, metrics)
    }

    /// Wire every service over the shared primary store.
    ///
    /// With `store_fallback_enabled` only the rate limiter is served by the
    /// in-process fallback while the primary is unreachable. Cache, edge
    /// purge and authorization stay on the primary so their faults reach
    /// the caller and authorization fails closed.
    pub fn with_primary_store(
        config: Config,
        primary: Arc<dyn AtomicStore>,
        catalog: &CatalogLoader,
        metrics: Arc<CoordinationMetrics>,
    ) -> Result<Self, CoordinationError> {
        let limiter_store: Arc<dyn AtomicStore> = if config.store_fallback_enabled {
            Arc::new(
                ResilientStore::new(
                    primary.clone(),
                    Arc::new(InMemoryStore::new()),
                    config.circuit_breaker_failure_threshold,
                    Duration::from_secs(config.circuit_breaker_cooldown_secs),
                )
                .with_metrics(metrics.clone()),
            )
        } else {
            primary.clone()
        };
        Self::assemble(config, primary, limiter_store, catalog, metrics)
    }

    /// Wire every service, the rate limiter included, over one store
    pub fn with_store(
        config: Config,
        store: Arc<dyn AtomicStore>,
        catalog: &CatalogLoader,
        metrics: Arc<CoordinationMetrics>,
    ) -> Result<Self, CoordinationError> {
        Self::assemble(config, store.clone(), store, catalog, metrics)
    }

    fn assemble(
        config: Config,
        store: Arc<dyn AtomicStore>,
        limiter_store: Arc<dyn AtomicStore>,
        catalog: &CatalogLoader,
        metrics: Arc<CoordinationMetrics>,
    ) -> Result<Self, CoordinationError> {
        let rate_limiter = RateLimiter::from_config(limiter_store, &config).with_metrics(metrics.clone());
        let cache = Arc::new(DistributedCache::from_config(store.clone(), &config));

        let edge: Arc<dyn EdgeCache> = match &config.edge_purge_url {
            Some(url) => Arc::new(HttpEdgePurger::new(url.clone())?),
            None => Arc::new(
                StoreEdgeCache::new(store.clone())
                    .with_prefix(config.edge_cache_prefix.clone())
                    .with_operation_timeout(Duration::from_millis(config.redis_operation_timeout_ms)),
            ),
        };
        let invalidation = InvalidationEngine::new(cache.clone(), Arc::new(catalog.invalidation_catalog()))
            .with_edge_cache(edge)
            .with_metrics(metrics.clone());

        let authorization =
            AuthorizationService::from_config(store.clone(), Arc::new(catalog.permission_resolver()?), &config)
                .with_metrics(metrics.clone());

        info!(
            backend = store.backend_name(),
            algorithm = %config.rate_limit_algorithm,
            "Coordination core ready"
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            rate_limiter: Arc::new(rate_limiter),
            cache,
            invalidation: Arc::new(invalidation),
            authorization: Arc::new(authorization),
            metrics,
        })
    }
}

/// Create the Axum router
///
/// Middleware stack (outermost to innermost):
/// - Request timeout (tower::timeout), mapped to 408
/// - Rate limiting (protected routes only)
///
/// `/health` and `/metrics` bypass rate limiting.
pub fn create_router(state: CoordinationState) -> Router {
    let protected = Router::new()
        .route("/v1/authorize", post(handlers::authorize_handler))
        .route("/v1/cache/invalidate", post(handlers::invalidate_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ));

    let timeout = Duration::from_secs(state.config.request_timeout_secs);
    let middleware_stack = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(|e: BoxError| async move {
            let status = if e.is::<tower::timeout::error::Elapsed>() {
                StatusCode::REQUEST_TIMEOUT
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, e.to_string())
        }))
        .timeout(timeout)
        .into_inner();

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .merge(protected)
        .layer(middleware_stack)
        .with_state(state)
}
