// Invalidation engine: key, pattern, tag and front-door removal after writes

use crate::cache::catalog::InvalidationCatalog;
use crate::cache::distributed::DistributedCache;
use crate::cache::edge::{EdgeCache, NoopEdgeCache};
use crate::cache::placeholders::substitute_placeholders;
use crate::core::metrics::CoordinationMetrics;
use crate::core::models::CacheKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Contract for write operations that clear cache entries once they complete.
///
/// Patterns, keys and tags may embed `{Field}` placeholders; `resolve_field`
/// supplies the operation's own values for them. Unknown fields stay literal.
pub trait CacheInvalidating: Send + Sync {
    fn invalidation_patterns(&self) -> Vec<String>;

    fn invalidation_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn invalidation_tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Skip invalidation when the operation reports failure (default true)
    fn invalidate_only_on_success(&self) -> bool {
        true
    }

    fn resolve_field(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Explicit set of keys, patterns and tags to clear
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationBatch {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl InvalidationBatch {
    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Declared targets of a command with its placeholders resolved
    pub fn from_command(command: &dyn CacheInvalidating) -> Self {
        let resolve = |name: &str| command.resolve_field(name);
        let mut batch = Self {
            keys: command
                .invalidation_keys()
                .iter()
                .map(|k| substitute_placeholders(k, resolve))
                .collect(),
            patterns: command
                .invalidation_patterns()
                .iter()
                .map(|p| substitute_placeholders(p, resolve))
                .collect(),
            tags: command
                .invalidation_tags()
                .iter()
                .map(|t| substitute_placeholders(t, resolve))
                .collect(),
        };
        batch.dedup();
        batch
    }

    pub fn merge(&mut self, other: InvalidationBatch) {
        self.keys.extend(other.keys);
        self.patterns.extend(other.patterns);
        self.tags.extend(other.tags);
        self.dedup();
    }

    /// Drop blanks and repeats, keeping first-seen order
    pub fn dedup(&mut self) {
        for list in [&mut self.keys, &mut self.patterns, &mut self.tags] {
            let mut seen: Vec<String> = Vec::with_capacity(list.len());
            list.retain(|item| {
                if item.trim().is_empty() || seen.contains(item) {
                    false
                } else {
                    seen.push(item.clone());
                    true
                }
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.patterns.is_empty() && self.tags.is_empty()
    }

    fn keywords(&self) -> Vec<String> {
        self.patterns
            .iter()
            .chain(self.keys.iter())
            .chain(self.tags.iter())
            .cloned()
            .collect()
    }
}

/// What one invalidation pass removed; faults are recorded, never raised
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub keys_removed: u64,
    pub pattern_entries_removed: u64,
    pub tag_entries_removed: u64,
    pub edge_paths: Vec<String>,
    pub edge_entries_removed: u64,
    pub errors: Vec<String>,
}

impl InvalidationReport {
    pub fn total_removed(&self) -> u64 {
        self.keys_removed + self.pattern_entries_removed + self.tag_entries_removed
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Clears internal cache entries and derived front-door paths.
///
/// Removal is not transactional across keys: each key, pattern scan and tag
/// is its own store step, so invalidation is eventual within one scan pass.
/// Faults are logged and swallowed because the write has already committed.
pub struct InvalidationEngine {
    cache: Arc<DistributedCache>,
    catalog: Arc<InvalidationCatalog>,
    edge: Arc<dyn EdgeCache>,
    metrics: Option<Arc<CoordinationMetrics>>,
}

impl InvalidationEngine {
    pub fn new(cache: Arc<DistributedCache>, catalog: Arc<InvalidationCatalog>) -> Self {
        Self {
            cache,
            catalog,
            edge: Arc::new(NoopEdgeCache),
            metrics: None,
        }
    }

    pub fn with_edge_cache(mut self, edge: Arc<dyn EdgeCache>) -> Self {
        self.edge = edge;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<CoordinationMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn catalog(&self) -> &InvalidationCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> &Arc<DistributedCache> {
        &self.cache
    }

    /// Clear what a completed command declares plus the catalog rules for `trigger`
    pub async fn invalidate(
        &self,
        command: &dyn CacheInvalidating,
        trigger: &str,
        cancel: &CancellationToken,
    ) -> InvalidationReport {
        let mut batch = InvalidationBatch::from_command(command);
        batch.merge(
            self.catalog
                .batch_for_trigger(trigger, |name| command.resolve_field(name)),
        );
        self.run(trigger, batch, cancel).await
    }

    /// Clear the catalog rules registered for `trigger`
    pub async fn invalidate_trigger<F>(&self, trigger: &str, resolve: F, cancel: &CancellationToken) -> InvalidationReport
    where
        F: Fn(&str) -> Option<String>,
    {
        let batch = self.catalog.batch_for_trigger(trigger, resolve);
        self.run(trigger, batch, cancel).await
    }

    /// Administrative entry point outside any write operation
    pub async fn invalidate_batch(&self, batch: InvalidationBatch, cancel: &CancellationToken) -> InvalidationReport {
        let mut batch = batch;
        batch.dedup();
        info!(
            keys = batch.keys.len(),
            patterns = batch.patterns.len(),
            tags = batch.tags.len(),
            "Manual cache invalidation"
        );
        self.run("", batch, cancel).await
    }

    async fn run(&self, trigger: &str, batch: InvalidationBatch, cancel: &CancellationToken) -> InvalidationReport {
        let mut report = InvalidationReport::default();

        if !batch.keys.is_empty() {
            let keys: Vec<CacheKey> = batch.keys.iter().map(|k| CacheKey::new(k.as_str())).collect();
            match self.cache.remove_many(&keys, cancel).await {
                Ok(removed) => report.keys_removed = removed,
                Err(e) => report.errors.push(format!("keys: {}", e)),
            }
        }

        for pattern in &batch.patterns {
            match self.cache.remove_by_pattern(pattern, cancel).await {
                Ok(removed) => report.pattern_entries_removed += removed,
                Err(e) => report.errors.push(format!("pattern {}: {}", pattern, e)),
            }
        }

        for tag in &batch.tags {
            match self.cache.remove_by_tag(tag, cancel).await {
                Ok(removed) => report.tag_entries_removed += removed,
                Err(e) => report.errors.push(format!("tag {}: {}", tag, e)),
            }
        }

        report.edge_paths = self.catalog.edge_paths(trigger, &batch.keywords());
        if !report.edge_paths.is_empty() {
            match self.edge.purge(&report.edge_paths, cancel).await {
                Ok(removed) => report.edge_entries_removed = removed,
                Err(e) => report.errors.push(format!("edge {}: {}", self.edge.name(), e)),
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_invalidation("key", report.keys_removed);
            metrics.record_invalidation("pattern", report.pattern_entries_removed);
            metrics.record_invalidation("tag", report.tag_entries_removed);
            metrics.record_invalidation("edge", report.edge_paths.len() as u64);
        }

        if report.is_clean() {
            debug!(
                trigger,
                removed = report.total_removed(),
                edge_paths = report.edge_paths.len(),
                "Cache invalidation complete"
            );
        } else {
            warn!(
                trigger,
                removed = report.total_removed(),
                errors = ?report.errors,
                "Cache invalidation incomplete, stale entries may be served until they expire"
            );
        }
        report
    }
}
