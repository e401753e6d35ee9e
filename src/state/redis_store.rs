// Redis-backed atomic store over a bb8 connection pool

use crate::config::Config;
use crate::core::errors::CoordinationError;
use crate::state::store::{AtomicStore, StoreScript};
use async_trait::async_trait;
use bb8_redis::{bb8::Pool, bb8::PooledConnection, RedisConnectionManager};
use std::collections::HashMap;
use std::future::Future;
use std::ops::DerefMut;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_CONNECT_ATTEMPTS: u32 = 3;
const RETRY_DELAY_MS: u64 = 500;
const SCAN_COUNT: usize = 500;
const DELETE_CHUNK: usize = 256;

/// Shared networked store.
///
/// Scripts run through `redis::Script`, which sends EVALSHA and loads the
/// body on a NOSCRIPT reply, so each script is atomic on the server.
pub struct RedisAtomicStore {
    pool: Pool<RedisConnectionManager>,
    scripts: HashMap<StoreScript, redis::Script>,
    connection_timeout: Duration,
    operation_timeout: Duration,
}

impl RedisAtomicStore {
    pub async fn from_config(config: &Config) -> Result<Self, CoordinationError> {
        Self::connect(
            &config.redis_url,
            config.redis_pool_max_size,
            Duration::from_secs(config.redis_connection_timeout_secs),
            Duration::from_millis(config.redis_operation_timeout_ms),
        )
        .await
    }

    /// Build the pool and verify it answers PING, retrying with linear backoff
    pub async fn connect(
        redis_url: &str,
        max_size: u32,
        connection_timeout: Duration,
        operation_timeout: Duration,
    ) -> Result<Self, CoordinationError> {
        let mut connection_errors = Vec::new();

        for attempt in 0..MAX_CONNECT_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64)).await;
            }

            match Self::try_connect(redis_url, max_size, connection_timeout, operation_timeout).await {
                Ok(store) => match store.ping().await {
                    Ok(()) => {
                        if attempt > 0 {
                            info!(attempt = attempt + 1, "Redis connection succeeded after retry");
                        }
                        return Ok(store);
                    }
                    Err(e) => connection_errors.push(format!("Pool created but ping failed: {}", e)),
                },
                Err(e) => {
                    if attempt < MAX_CONNECT_ATTEMPTS - 1 {
                        warn!(
                            attempt = attempt + 1,
                            max_attempts = MAX_CONNECT_ATTEMPTS,
                            error = %e,
                            "Redis connection attempt failed, retrying"
                        );
                    }
                    connection_errors.push(format!("Attempt {} failed: {}", attempt + 1, e));
                }
            }
        }

        Err(CoordinationError::StoreUnavailable(format!(
            "Failed to connect to Redis after {} attempts: {}",
            MAX_CONNECT_ATTEMPTS,
            connection_errors.join("; ")
        )))
    }

    async fn try_connect(
        redis_url: &str,
        max_size: u32,
        connection_timeout: Duration,
        operation_timeout: Duration,
    ) -> Result<Self, CoordinationError> {
        let manager = RedisConnectionManager::new(redis_url).map_err(|e| {
            CoordinationError::ConfigurationError(format!("Invalid Redis URL '{}': {}", redis_url, e))
        })?;

        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(connection_timeout)
            .build(manager)
            .await
            .map_err(|e| CoordinationError::StoreUnavailable(format!("Failed to build pool: {}", e)))?;

        let scripts = StoreScript::all()
            .into_iter()
            .map(|script| (script, redis::Script::new(script.lua())))
            .collect();

        Ok(Self {
            pool,
            scripts,
            connection_timeout,
            operation_timeout,
        })
    }

    async fn connection(&self) -> Result<PooledConnection<'_, RedisConnectionManager>, CoordinationError> {
        match tokio::time::timeout(self.connection_timeout, self.pool.get()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(CoordinationError::StoreUnavailable(format!("Pool error: {}", e))),
            Err(_) => Err(CoordinationError::Timeout(self.connection_timeout.as_millis() as u64)),
        }
    }

    /// Bound one command by the operation timeout and map its error
    async fn timed<T, F>(&self, operation: &'static str, command: F) -> Result<T, CoordinationError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                debug!(operation, error = %e, "Redis command failed");
                Err(CoordinationError::from(e))
            }
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.operation_timeout.as_millis() as u64,
                    "Redis command timed out"
                );
                Err(CoordinationError::Timeout(self.operation_timeout.as_millis() as u64))
            }
        }
    }
}

/// Escape glob metacharacters so SCAN MATCH treats the prefix literally
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

#[async_trait]
impl AtomicStore for RedisAtomicStore {
    async fn exists(&self, key: &str) -> Result<bool, CoordinationError> {
        let mut conn = self.connection().await?;
        let count: i64 = self
            .timed("EXISTS", redis::cmd("EXISTS").arg(key).query_async::<i64>(conn.deref_mut()))
            .await?;
        Ok(count > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CoordinationError> {
        let mut conn = self.connection().await?;
        let set: i64 = self
            .timed(
                "PEXPIRE",
                redis::cmd("PEXPIRE")
                    .arg(key)
                    .arg(ttl.as_millis() as u64)
                    .query_async::<i64>(conn.deref_mut()),
            )
            .await?;
        Ok(set == 1)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CoordinationError> {
        let mut conn = self.connection().await?;
        let pttl: i64 = self
            .timed("PTTL", redis::cmd("PTTL").arg(key).query_async::<i64>(conn.deref_mut()))
            .await?;
        Ok((pttl >= 0).then(|| Duration::from_millis(pttl as u64)))
    }

    async fn delete(&self, key: &str) -> Result<bool, CoordinationError> {
        let mut conn = self.connection().await?;
        let removed: i64 = self
            .timed("DEL", redis::cmd("DEL").arg(key).query_async::<i64>(conn.deref_mut()))
            .await?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, CoordinationError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        let mut removed = 0u64;
        for chunk in keys.chunks(DELETE_CHUNK) {
            let count: i64 = self
                .timed("DEL", redis::cmd("DEL").arg(chunk).query_async::<i64>(conn.deref_mut()))
                .await?;
            removed += count.max(0) as u64;
        }
        Ok(removed)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        let mut conn = self.connection().await?;
        self.timed(
            "GET",
            redis::cmd("GET").arg(key).query_async::<Option<String>>(conn.deref_mut()),
        )
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CoordinationError> {
        let mut conn = self.connection().await?;
        let mut command = redis::cmd("SET");
        command.arg(key).arg(value);
        if let Some(ttl) = ttl {
            command.arg("PX").arg((ttl.as_millis() as u64).max(1));
        }
        self.timed("SET", command.query_async::<()>(conn.deref_mut())).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CoordinationError> {
        let mut conn = self.connection().await?;
        self.timed(
            "SMEMBERS",
            redis::cmd("SMEMBERS").arg(key).query_async::<Vec<String>>(conn.deref_mut()),
        )
        .await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CoordinationError> {
        let mut conn = self.connection().await?;
        let pattern = escape_glob(prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .timed(
                    "SCAN",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT)
                        .query_async::<(u64, Vec<String>)>(conn.deref_mut()),
                )
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn execute_atomic(
        &self,
        script: StoreScript,
        keys: &[String],
        args: &[String],
    ) -> Result<Vec<i64>, CoordinationError> {
        if keys.len() < script.min_keys() {
            return Err(CoordinationError::ScriptResult(format!(
                "{} needs {} keys, got {}",
                script.name(),
                script.min_keys(),
                keys.len()
            )));
        }
        let body = self
            .scripts
            .get(&script)
            .ok_or_else(|| CoordinationError::ScriptResult(format!("{} is not loaded", script.name())))?;

        let mut invocation = body.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg);
        }

        let mut conn = self.connection().await?;
        self.timed(
            script.name(),
            invocation.invoke_async::<Vec<i64>>(conn.deref_mut()),
        )
        .await
    }

    async fn ping(&self) -> Result<(), CoordinationError> {
        let mut conn = self.connection().await?;
        let reply: String = self
            .timed("PING", redis::cmd("PING").query_async::<String>(conn.deref_mut()))
            .await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(CoordinationError::StoreUnavailable(format!(
                "Unexpected PING response: {}",
                reply
            )))
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
