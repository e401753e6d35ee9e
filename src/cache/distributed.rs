// Distributed cache over the shared store with tag and pattern removal

use crate::cache::pattern::KeyPattern;
use crate::config::Config;
use crate::core::clock::{Clock, SystemClock};
use crate::core::errors::CoordinationError;
use crate::core::guard::guarded;
use crate::core::models::{CacheEntryOptions, CacheExpiration, CacheKey, CachePriority};
use crate::state::keys::tag_key;
use crate::state::store::{duration_millis, expect_reply, AtomicStore, StoreScript};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_KEY_PREFIX: &str = "cache:";
const DEFAULT_TTL: Duration = Duration::from_secs(300);
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(500);

/// Stored form of a cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    value: serde_json::Value,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    priority: CachePriority,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    sliding_ms: Option<u64>,
    stored_at: DateTime<Utc>,
}

/// Cache of JSON values shared by every instance through the store.
///
/// Entries live at `{prefix}{key}` or `{prefix}{region}:{key}`; each tag
/// keeps a `tag:{tag}` set of full keys whose TTL covers its longest-lived
/// member. Store errors propagate to the caller.
pub struct DistributedCache {
    store: Arc<dyn AtomicStore>,
    clock: Arc<dyn Clock>,
    key_prefix: String,
    default_ttl: Duration,
    operation_timeout: Duration,
}

impl DistributedCache {
    pub fn new(store: Arc<dyn AtomicStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock::new()),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            default_ttl: DEFAULT_TTL,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    pub fn from_config(store: Arc<dyn AtomicStore>, config: &Config) -> Self {
        Self::new(store)
            .with_key_prefix(config.cache_key_prefix.clone())
            .with_default_ttl(Duration::from_secs(config.cache_default_ttl_secs))
            .with_operation_timeout(Duration::from_millis(config.redis_operation_timeout_ms))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Full store key for a logical key
    pub fn full_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.key_prefix, key.logical())
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        key: impl Into<CacheKey>,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, CoordinationError> {
        let full_key = self.full_key(&key.into());
        guarded(cancel, self.operation_timeout, self.read(&full_key))
            .await?
            .map(|value| serde_json::from_value(value).map_err(CoordinationError::from))
            .transpose()
    }

    async fn read(&self, full_key: &str) -> Result<Option<serde_json::Value>, CoordinationError> {
        let Some(raw) = self.store.get(full_key).await? else {
            return Ok(None);
        };
        let envelope = match serde_json::from_str::<Envelope>(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(key = full_key, error = %e, "Corrupted cache entry, deleting");
                self.store.delete(full_key).await?;
                return Ok(None);
            }
        };

        if let Some(sliding_ms) = envelope.sliding_ms {
            let mut keys = vec![full_key.to_string()];
            keys.extend(envelope.tags.iter().map(|t| tag_key(t)));
            self.store
                .execute_atomic(StoreScript::TouchWithTags, &keys, &[sliding_ms.to_string()])
                .await?;
        }
        Ok(Some(envelope.value))
    }

    pub async fn set<T: Serialize>(
        &self,
        key: impl Into<CacheKey>,
        value: &T,
        options: CacheEntryOptions,
        cancel: &CancellationToken,
    ) -> Result<(), CoordinationError> {
        let key = key.into();
        let full_key = self.full_key(&key);

        let (ttl_ms, sliding_ms) = match options.expiration {
            CacheExpiration::Default => (duration_millis(self.default_ttl), None),
            CacheExpiration::Absolute(ttl) => (duration_millis(ttl), None),
            CacheExpiration::Sliding(ttl) => (duration_millis(ttl), Some(duration_millis(ttl))),
            CacheExpiration::Never => (0, None),
        };

        let mut tags = options.tags;
        tags.sort();
        tags.dedup();

        let envelope = Envelope {
            value: serde_json::to_value(value)?,
            tags: tags.clone(),
            priority: options.priority,
            region: key.region.clone(),
            sliding_ms,
            stored_at: self.clock.now(),
        };
        let record = serde_json::to_string(&envelope)?;

        let mut keys = Vec::with_capacity(tags.len() + 1);
        keys.push(full_key.clone());
        keys.extend(tags.iter().map(|t| tag_key(t)));

        let reply = guarded(
            cancel,
            self.operation_timeout,
            self.store.execute_atomic(
                StoreScript::SetWithTags,
                &keys,
                &[record, ttl_ms.to_string(), full_key.clone()],
            ),
        )
        .await?;
        expect_reply::<1>(StoreScript::SetWithTags, &reply)?;
        debug!(key = %full_key, tags = tags.len(), ttl_ms, "Cache entry stored");
        Ok(())
    }

    /// Return the cached value or build, store and return it.
    ///
    /// A failed write after a successful build is logged; the built value is
    /// still returned.
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: impl Into<CacheKey>,
        options: CacheEntryOptions,
        factory: F,
        cancel: &CancellationToken,
    ) -> Result<T, CoordinationError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoordinationError>>,
    {
        let key = key.into();
        if let Some(hit) = self.get::<T>(key.clone(), cancel).await? {
            return Ok(hit);
        }

        let value = factory().await?;
        if let Err(e) = self.set(key.clone(), &value, options, cancel).await {
            warn!(key = %key.logical(), error = %e, "Failed to store built cache value");
        }
        Ok(value)
    }

    pub async fn exists(&self, key: impl Into<CacheKey>, cancel: &CancellationToken) -> Result<bool, CoordinationError> {
        let full_key = self.full_key(&key.into());
        guarded(cancel, self.operation_timeout, self.store.exists(&full_key)).await
    }

    pub async fn remove(&self, key: impl Into<CacheKey>, cancel: &CancellationToken) -> Result<bool, CoordinationError> {
        let full_key = self.full_key(&key.into());
        guarded(cancel, self.operation_timeout, self.store.delete(&full_key)).await
    }

    pub async fn remove_many(&self, keys: &[CacheKey], cancel: &CancellationToken) -> Result<u64, CoordinationError> {
        let full_keys: Vec<String> = keys.iter().map(|k| self.full_key(k)).collect();
        guarded(cancel, self.operation_timeout, self.store.delete_many(&full_keys)).await
    }

    /// Remove every live entry whose logical key matches `pattern`.
    ///
    /// Scan then delete: an entry written after the scan starts can survive
    /// this pass.
    pub async fn remove_by_pattern(&self, pattern: &str, cancel: &CancellationToken) -> Result<u64, CoordinationError> {
        let matcher = KeyPattern::parse(pattern);
        let candidates = guarded(cancel, self.operation_timeout, self.store.scan_prefix(&self.key_prefix)).await?;

        let matched: Vec<String> = candidates
            .into_iter()
            .filter(|full_key| {
                full_key
                    .strip_prefix(self.key_prefix.as_str())
                    .map_or(false, |logical| matcher.matches(logical))
            })
            .collect();
        if matched.is_empty() {
            return Ok(0);
        }

        let removed = guarded(cancel, self.operation_timeout, self.store.delete_many(&matched)).await?;
        debug!(pattern = %matcher, removed, "Removed cache entries by pattern");
        Ok(removed)
    }

    /// Remove every entry indexed under `tag`, then the tag entry itself
    pub async fn remove_by_tag(&self, tag: &str, cancel: &CancellationToken) -> Result<u64, CoordinationError> {
        let reply = guarded(
            cancel,
            self.operation_timeout,
            self.store
                .execute_atomic(StoreScript::RemoveByTag, &[tag_key(tag)], &[]),
        )
        .await?;
        let [removed] = expect_reply::<1>(StoreScript::RemoveByTag, &reply)?;
        debug!(tag, removed, "Removed cache entries by tag");
        Ok(removed.max(0) as u64)
    }
}
