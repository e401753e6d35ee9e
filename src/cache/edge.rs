// Front-door response cache purgers

use crate::core::errors::CoordinationError;
use crate::core::guard::guarded;
use crate::state::store::AtomicStore;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const DEFAULT_EDGE_PREFIX: &str = "edge:";
const DEFAULT_PURGE_TIMEOUT: Duration = Duration::from_secs(2);

/// Removes cached full responses for a set of request paths
#[async_trait]
pub trait EdgeCache: Send + Sync {
    /// Purge every cached response under `paths`, returning how many were removed
    /// (or, for remote purgers, how many paths were accepted)
    async fn purge(&self, paths: &[String], cancel: &CancellationToken) -> Result<u64, CoordinationError>;

    fn name(&self) -> &'static str;
}

/// Used when no front-door cache is deployed
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEdgeCache;

#[async_trait]
impl EdgeCache for NoopEdgeCache {
    async fn purge(&self, paths: &[String], _cancel: &CancellationToken) -> Result<u64, CoordinationError> {
        debug!(paths = paths.len(), "No edge cache configured, skipping purge");
        Ok(0)
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Front-door responses kept in the shared store.
///
/// A response for `path` lives at `{prefix}{path}#{content_hash}`; query and
/// sub-path variants (`{prefix}{path}?..`, `{prefix}{path}/..`) are purged
/// with their parent path.
pub struct StoreEdgeCache {
    store: Arc<dyn AtomicStore>,
    prefix: String,
    operation_timeout: Duration,
}

impl StoreEdgeCache {
    pub fn new(store: Arc<dyn AtomicStore>) -> Self {
        Self {
            store,
            prefix: DEFAULT_EDGE_PREFIX.to_string(),
            operation_timeout: Duration::from_millis(500),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn entry_key(&self, path: &str, content_hash: &str) -> String {
        format!("{}{}#{}", self.prefix, path, content_hash)
    }

    /// Store a rendered response for `path`
    pub async fn put(
        &self,
        path: &str,
        content_hash: &str,
        body: &str,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), CoordinationError> {
        let key = self.entry_key(path, content_hash);
        guarded(cancel, self.operation_timeout, self.store.set(&key, body, Some(ttl))).await
    }

    fn covers(&self, key: &str, path: &str) -> bool {
        key.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(path))
            .map_or(false, |tail| {
                tail.is_empty() || tail.starts_with('#') || tail.starts_with('?') || tail.starts_with('/')
            })
    }
}

#[async_trait]
impl EdgeCache for StoreEdgeCache {
    async fn purge(&self, paths: &[String], cancel: &CancellationToken) -> Result<u64, CoordinationError> {
        let mut doomed: Vec<String> = Vec::new();
        for path in paths {
            let scope = format!("{}{}", self.prefix, path);
            let candidates = guarded(cancel, self.operation_timeout, self.store.scan_prefix(&scope)).await?;
            doomed.extend(candidates.into_iter().filter(|key| self.covers(key, path)));
        }
        doomed.sort();
        doomed.dedup();
        if doomed.is_empty() {
            return Ok(0);
        }

        let removed = guarded(cancel, self.operation_timeout, self.store.delete_many(&doomed)).await?;
        debug!(paths = paths.len(), removed, "Purged edge cache entries");
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "store"
    }
}

#[derive(Debug, Serialize)]
struct PurgeRequest<'a> {
    paths: &'a [String],
}

/// Remote front door purged over HTTP: `POST {endpoint}` with `{"paths": [...]}`
pub struct HttpEdgePurger {
    http_client: Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpEdgePurger {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, CoordinationError> {
        Self::with_timeout(endpoint, DEFAULT_PURGE_TIMEOUT)
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, CoordinationError> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint).map_err(|e| {
            CoordinationError::ConfigurationError(format!("Invalid edge purge URL '{}': {}", endpoint, e))
        })?;

        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(1))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| {
                CoordinationError::ConfigurationError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            endpoint,
            timeout,
        })
    }

    async fn send(&self, paths: &[String]) -> Result<u64, CoordinationError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&PurgeRequest { paths })
            .send()
            .await
            .map_err(|e| CoordinationError::EdgePurgeError(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            error!(status = status.as_u16(), endpoint = %self.endpoint, "Edge purge rejected");
            return Err(CoordinationError::EdgePurgeError(format!("HTTP {}", status.as_u16())));
        }

        info!(paths = paths.len(), "Edge purge accepted");
        Ok(paths.len() as u64)
    }
}

#[async_trait]
impl EdgeCache for HttpEdgePurger {
    async fn purge(&self, paths: &[String], cancel: &CancellationToken) -> Result<u64, CoordinationError> {
        if paths.is_empty() {
            return Ok(0);
        }
        // The client enforces the request timeout; pad the guard so it reports first
        guarded(cancel, self.timeout + Duration::from_millis(100), self.send(paths)).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
