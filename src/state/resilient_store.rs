// Circuit-breaker composite: shared store first, same-process fallback when it is down

use crate::core::errors::CoordinationError;
use crate::core::metrics::CoordinationMetrics;
use crate::core::resilience::{create_circuit_breaker, execute_with_cb, StoreCircuitBreaker};
use crate::state::memory_store::InMemoryStore;
use crate::state::store::{AtomicStore, StoreScript};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Store that degrades to an in-process [`InMemoryStore`] when the primary
/// fails or its circuit is open.
///
/// The fallback is single-instance and best-effort: counts, grants and cache
/// entries written there are not visible to other instances and are not
/// copied back once the primary recovers.
pub struct ResilientStore {
    primary: Arc<dyn AtomicStore>,
    fallback: Arc<InMemoryStore>,
    breaker: StoreCircuitBreaker,
    metrics: Option<Arc<CoordinationMetrics>>,
}

impl ResilientStore {
    pub fn new(
        primary: Arc<dyn AtomicStore>,
        fallback: Arc<InMemoryStore>,
        failure_threshold: u32,
        cooldown: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            breaker: create_circuit_breaker(failure_threshold, cooldown),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CoordinationMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn fallback(&self) -> &Arc<InMemoryStore> {
        &self.fallback
    }

    async fn with_fallback<T, P, F>(
        &self,
        operation: &'static str,
        primary: P,
        fallback: F,
    ) -> Result<T, CoordinationError>
    where
        P: Future<Output = Result<T, CoordinationError>>,
        F: Future<Output = Result<T, CoordinationError>>,
    {
        match execute_with_cb(&self.breaker, primary).await {
            Ok(value) => Ok(value),
            Err(CoordinationError::Cancelled) => Err(CoordinationError::Cancelled),
            Err(e) => {
                warn!(
                    operation,
                    primary = self.primary.backend_name(),
                    error = %e,
                    "Shared store call failed, serving from in-process fallback"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_fallback(operation);
                }
                fallback.await
            }
        }
    }
}

#[async_trait]
impl AtomicStore for ResilientStore {
    async fn exists(&self, key: &str) -> Result<bool, CoordinationError> {
        self.with_fallback("exists", self.primary.exists(key), self.fallback.exists(key))
            .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CoordinationError> {
        self.with_fallback("expire", self.primary.expire(key, ttl), self.fallback.expire(key, ttl))
            .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CoordinationError> {
        self.with_fallback("ttl", self.primary.ttl(key), self.fallback.ttl(key))
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool, CoordinationError> {
        self.with_fallback("delete", self.primary.delete(key), self.fallback.delete(key))
            .await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, CoordinationError> {
        self.with_fallback(
            "delete_many",
            self.primary.delete_many(keys),
            self.fallback.delete_many(keys),
        )
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        self.with_fallback("get", self.primary.get(key), self.fallback.get(key))
            .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CoordinationError> {
        self.with_fallback(
            "set",
            self.primary.set(key, value, ttl),
            self.fallback.set(key, value, ttl),
        )
        .await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CoordinationError> {
        self.with_fallback(
            "set_members",
            self.primary.set_members(key),
            self.fallback.set_members(key),
        )
        .await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CoordinationError> {
        self.with_fallback(
            "scan_prefix",
            self.primary.scan_prefix(prefix),
            self.fallback.scan_prefix(prefix),
        )
        .await
    }

    async fn execute_atomic(
        &self,
        script: StoreScript,
        keys: &[String],
        args: &[String],
    ) -> Result<Vec<i64>, CoordinationError> {
        self.with_fallback(
            script.name(),
            self.primary.execute_atomic(script, keys, args),
            self.fallback.execute_atomic(script, keys, args),
        )
        .await
    }

    /// Health reflects the primary only
    async fn ping(&self) -> Result<(), CoordinationError> {
        self.primary.ping().await
    }

    fn backend_name(&self) -> &'static str {
        "resilient"
    }
}
