// Distributed rate limiting: sliding-window and fixed-window counters on the shared store

use crate::config::Config;
use crate::core::clock::{checked_add, Clock, SystemClock};
use crate::core::errors::CoordinationError;
use crate::core::guard::guarded;
use crate::core::metrics::CoordinationMetrics;
use crate::core::models::{FailurePolicy, RateLimitAlgorithm, RateLimitResult, RateLimitRule};
use crate::state::store::{duration_millis, expect_reply, AtomicStore, StoreScript};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

const DEFAULT_KEY_PREFIX: &str = "ratelimit:";
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(500);

/// Longest window a check accepts; longer windows are capped to it
pub const MAX_WINDOW: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Check-and-increment rate limiter.
///
/// Every decision is one atomic store script, so concurrent instances never
/// admit more than `limit` hits into a window. Store faults, timeouts and
/// cancellation are mapped through `failure_policy` (fail-open by default):
/// the limiter never blocks traffic because of its own dependency.
pub struct RateLimiter {
    store: Arc<dyn AtomicStore>,
    clock: Arc<dyn Clock>,
    key_prefix: String,
    operation_timeout: Duration,
    failure_policy: FailurePolicy,
    metrics: Option<Arc<CoordinationMetrics>>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn AtomicStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock::new()),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            failure_policy: FailurePolicy::FailOpen,
            metrics: None,
        }
    }

    pub fn from_config(store: Arc<dyn AtomicStore>, config: &Config) -> Self {
        Self::new(store)
            .with_key_prefix(config.rate_limit_key_prefix.clone())
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

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<CoordinationMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Count one hit against `key` and decide whether it is admitted.
    ///
    /// A denied hit is not counted. `remaining` is `max(0, limit - count)`.
    /// Windows longer than [`MAX_WINDOW`] are capped.
    pub async fn check_and_increment(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        algorithm: RateLimitAlgorithm,
        cancel: &CancellationToken,
    ) -> RateLimitResult {
        let window = window.min(MAX_WINDOW);
        let now = self.clock.now();
        let outcome = guarded(cancel, self.operation_timeout, async {
            match algorithm {
                RateLimitAlgorithm::SlidingWindow => self.sliding_window(key, limit, window, now).await,
                RateLimitAlgorithm::FixedWindow => self.fixed_window(key, limit, window, now).await,
            }
        })
        .await;

        match outcome {
            Ok(result) => {
                debug!(
                    key,
                    algorithm = %algorithm,
                    allowed = result.allowed,
                    count = result.current_count,
                    limit,
                    "Rate limit decision"
                );
                self.record(if result.allowed { "allowed" } else { "denied" });
                result
            }
            Err(e) => self.degraded(key, limit, window, now, &e),
        }
    }

    /// Evaluate each `{key: rule}` independently; there is no cross-key atomicity
    pub async fn check_batch(
        &self,
        rules: &HashMap<String, RateLimitRule>,
        algorithm: RateLimitAlgorithm,
        cancel: &CancellationToken,
    ) -> HashMap<String, RateLimitResult> {
        let mut results = HashMap::with_capacity(rules.len());
        for (key, rule) in rules {
            let result = self
                .check_and_increment(key, rule.limit, rule.window, algorithm, cancel)
                .await;
            results.insert(key.clone(), result);
        }
        results
    }

    /// Current window state without counting a hit
    pub async fn status(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        algorithm: RateLimitAlgorithm,
        cancel: &CancellationToken,
    ) -> RateLimitResult {
        let window = window.min(MAX_WINDOW);
        let now = self.clock.now();
        let store_key = self.store_key(key);
        let outcome = guarded(cancel, self.operation_timeout, async {
            match algorithm {
                RateLimitAlgorithm::SlidingWindow => {
                    let reply = self
                        .store
                        .execute_atomic(
                            StoreScript::SlidingWindowPeek,
                            &[store_key.clone()],
                            &[now.timestamp_millis().to_string(), duration_millis(window).to_string()],
                        )
                        .await?;
                    let [count, oldest_ms] = expect_reply::<2>(StoreScript::SlidingWindowPeek, &reply)?;
                    let count = count.max(0) as u64;
                    Ok(RateLimitResult::new(
                        count < limit,
                        count,
                        limit,
                        sliding_reset(oldest_ms, window, now),
                    ))
                }
                RateLimitAlgorithm::FixedWindow => {
                    let count = match self.store.get(&store_key).await? {
                        Some(raw) => raw.parse::<u64>().map_err(|_| {
                            CoordinationError::ScriptResult(format!("counter at {} is not an integer", store_key))
                        })?,
                        None => 0,
                    };
                    let ttl = self.store.ttl(&store_key).await?;
                    let reset = window_end(now, ttl.unwrap_or(window));
                    Ok(RateLimitResult::new(count < limit, count, limit, reset))
                }
            }
        })
        .await;

        outcome.unwrap_or_else(|e| {
            warn!(key, error = %e, "Rate limit status unavailable");
            self.fallback_result(limit, window, now)
        })
    }

    /// Clear a key's window (administrative)
    pub async fn reset(&self, key: &str, cancel: &CancellationToken) -> Result<bool, CoordinationError> {
        let store_key = self.store_key(key);
        guarded(cancel, self.operation_timeout, self.store.delete(&store_key)).await
    }

    async fn sliding_window(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<RateLimitResult, CoordinationError> {
        let now_ms = now.timestamp_millis();
        let member = format!("{}-{}", now_ms, Uuid::new_v4());
        let reply = self
            .store
            .execute_atomic(
                StoreScript::SlidingWindow,
                &[self.store_key(key)],
                &[
                    now_ms.to_string(),
                    duration_millis(window).to_string(),
                    limit.to_string(),
                    member,
                ],
            )
            .await?;
        let [allowed, count, oldest_ms] = expect_reply::<3>(StoreScript::SlidingWindow, &reply)?;

        Ok(RateLimitResult::new(
            allowed == 1,
            count.max(0) as u64,
            limit,
            sliding_reset(oldest_ms, window, now),
        ))
    }

    async fn fixed_window(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<RateLimitResult, CoordinationError> {
        let reply = self
            .store
            .execute_atomic(
                StoreScript::FixedWindow,
                &[self.store_key(key)],
                &[duration_millis(window).to_string(), limit.to_string()],
            )
            .await?;
        let [allowed, count, pttl_ms] = expect_reply::<3>(StoreScript::FixedWindow, &reply)?;

        let remaining_window = if pttl_ms >= 0 {
            Duration::from_millis(pttl_ms as u64)
        } else {
            window
        };

        Ok(RateLimitResult::new(
            allowed == 1,
            count.max(0) as u64,
            limit,
            window_end(now, remaining_window),
        ))
    }

    fn degraded(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
        error: &CoordinationError,
    ) -> RateLimitResult {
        match self.failure_policy {
            FailurePolicy::FailOpen => warn!(
                key,
                error = %error,
                "Rate limit store unavailable, allowing request (fail-open)"
            ),
            FailurePolicy::FailClosed => warn!(
                key,
                error = %error,
                "Rate limit store unavailable, denying request (fail-closed)"
            ),
        }
        self.record("degraded");
        self.fallback_result(limit, window, now)
    }

    fn fallback_result(&self, limit: u64, window: Duration, now: DateTime<Utc>) -> RateLimitResult {
        let reset = window_end(now, window);
        match self.failure_policy {
            FailurePolicy::FailOpen => RateLimitResult::new(true, 0, limit, reset),
            FailurePolicy::FailClosed => RateLimitResult {
                allowed: false,
                current_count: 0,
                limit,
                reset_time: reset,
                remaining: 0,
            },
        }
    }

    fn record(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_rate_limit(outcome);
        }
    }
}

/// The window frees a slot when its oldest entry ages out
fn sliding_reset(oldest_ms: i64, window: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(oldest_ms)
        .single()
        .map(|oldest| window_end(oldest, window))
        .unwrap_or_else(|| window_end(now, window))
}

/// `from + window`, saturating at the latest representable instant
fn window_end(from: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    checked_add(from, window).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
