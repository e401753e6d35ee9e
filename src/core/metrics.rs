// Prometheus counters for coordination decisions

use crate::core::errors::CoordinationError;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters for rate-limit decisions, store fallbacks, invalidations and
/// authorization decisions, held in a private registry.
pub struct CoordinationMetrics {
    registry: Registry,
    rate_limit_decisions: IntCounterVec,
    store_fallbacks: IntCounterVec,
    invalidations: IntCounterVec,
    authorization_decisions: IntCounterVec,
}

impl CoordinationMetrics {
    pub fn new() -> Result<Self, CoordinationError> {
        let registry = Registry::new();

        let rate_limit_decisions = Self::counter(
            &registry,
            "coordination_rate_limit_decisions_total",
            "Rate limit decisions by outcome",
            "outcome",
        )?;
        let store_fallbacks = Self::counter(
            &registry,
            "coordination_store_fallbacks_total",
            "Calls served by the in-process fallback store",
            "operation",
        )?;
        let invalidations = Self::counter(
            &registry,
            "coordination_cache_invalidations_total",
            "Cache entries or paths invalidated by kind",
            "kind",
        )?;
        let authorization_decisions = Self::counter(
            &registry,
            "coordination_authorization_decisions_total",
            "Authorization decisions by outcome",
            "outcome",
        )?;

        Ok(Self {
            registry,
            rate_limit_decisions,
            store_fallbacks,
            invalidations,
            authorization_decisions,
        })
    }

    fn counter(
        registry: &Registry,
        name: &str,
        help: &str,
        label: &str,
    ) -> Result<IntCounterVec, CoordinationError> {
        let counter = IntCounterVec::new(Opts::new(name, help), &[label])
            .map_err(|e| CoordinationError::ConfigurationError(format!("Invalid metric {}: {}", name, e)))?;
        registry
            .register(Box::new(counter.clone()))
            .map_err(|e| CoordinationError::ConfigurationError(format!("Failed to register {}: {}", name, e)))?;
        Ok(counter)
    }

    pub fn record_rate_limit(&self, outcome: &str) {
        self.rate_limit_decisions.with_label_values(&[outcome]).inc();
    }

    pub fn record_fallback(&self, operation: &str) {
        self.store_fallbacks.with_label_values(&[operation]).inc();
    }

    pub fn record_invalidation(&self, kind: &str, count: u64) {
        if count > 0 {
            self.invalidations.with_label_values(&[kind]).inc_by(count);
        }
    }

    pub fn record_authorization(&self, outcome: &str) {
        self.authorization_decisions.with_label_values(&[outcome]).inc();
    }

    pub fn rate_limit_count(&self, outcome: &str) -> u64 {
        self.rate_limit_decisions.with_label_values(&[outcome]).get()
    }

    pub fn fallback_count(&self, operation: &str) -> u64 {
        self.store_fallbacks.with_label_values(&[operation]).get()
    }

    pub fn invalidation_count(&self, kind: &str) -> u64 {
        self.invalidations.with_label_values(&[kind]).get()
    }

    pub fn authorization_count(&self, outcome: &str) -> u64 {
        self.authorization_decisions.with_label_values(&[outcome]).get()
    }

    /// Text exposition format for a `/metrics` endpoint
    pub fn render(&self) -> Result<String, CoordinationError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| CoordinationError::SerializationError(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| CoordinationError::SerializationError(format!("Metrics are not UTF-8: {}", e)))
    }
}
