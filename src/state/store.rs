// Atomic store contract shared by the networked store and the in-process fallback

use crate::core::errors::CoordinationError;
use async_trait::async_trait;
use std::time::Duration;

/// Atomic check-and-mutate sequences the core runs against the store.
///
/// Each script executes as one indivisible step: no other caller touching the
/// same keys can interleave with it. The networked store runs the Lua body;
/// the in-process store interprets the same semantics natively. Every script
/// replies with an integer array whose shape is listed per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreScript {
    /// KEYS: counter. ARGV: ttl_ms (0 = none). Reply: [count].
    /// TTL is applied only on the 0 -> 1 transition.
    IncrementWithTtl,
    /// KEYS: timestamp set. ARGV: now_ms, window_ms, limit, member.
    /// Reply: [allowed, count, oldest_ms].
    SlidingWindow,
    /// KEYS: timestamp set. ARGV: now_ms, window_ms. Reply: [count, oldest_ms].
    SlidingWindowPeek,
    /// KEYS: counter. ARGV: window_ms, limit. Reply: [allowed, count, pttl_ms].
    FixedWindow,
    /// KEYS: grant, principal index, resource index. ARGV: record, ttl_ms, member.
    /// Reply: [1].
    GrantPermission,
    /// KEYS: grant, principal index, resource index. ARGV: member.
    /// Reply: [removed].
    RevokePermission,
    /// KEYS: entry, tag sets... ARGV: value, ttl_ms (0 = none), member.
    /// Reply: [tag_count].
    SetWithTags,
    /// KEYS: entry, tag sets... ARGV: ttl_ms. Reply: [existed].
    TouchWithTags,
    /// KEYS: tag set. Reply: [removed].
    RemoveByTag,
}

impl StoreScript {
    pub fn name(&self) -> &'static str {
        match self {
            StoreScript::IncrementWithTtl => "increment_with_ttl",
            StoreScript::SlidingWindow => "sliding_window",
            StoreScript::SlidingWindowPeek => "sliding_window_peek",
            StoreScript::FixedWindow => "fixed_window",
            StoreScript::GrantPermission => "grant_permission",
            StoreScript::RevokePermission => "revoke_permission",
            StoreScript::SetWithTags => "set_with_tags",
            StoreScript::TouchWithTags => "touch_with_tags",
            StoreScript::RemoveByTag => "remove_by_tag",
        }
    }

    pub fn all() -> [StoreScript; 9] {
        [
            StoreScript::IncrementWithTtl,
            StoreScript::SlidingWindow,
            StoreScript::SlidingWindowPeek,
            StoreScript::FixedWindow,
            StoreScript::GrantPermission,
            StoreScript::RevokePermission,
            StoreScript::SetWithTags,
            StoreScript::TouchWithTags,
            StoreScript::RemoveByTag,
        ]
    }

    /// Lua body for the networked store
    pub fn lua(&self) -> &'static str {
        match self {
            StoreScript::IncrementWithTtl => INCREMENT_WITH_TTL,
            StoreScript::SlidingWindow => SLIDING_WINDOW,
            StoreScript::SlidingWindowPeek => SLIDING_WINDOW_PEEK,
            StoreScript::FixedWindow => FIXED_WINDOW,
            StoreScript::GrantPermission => GRANT_PERMISSION,
            StoreScript::RevokePermission => REVOKE_PERMISSION,
            StoreScript::SetWithTags => SET_WITH_TAGS,
            StoreScript::TouchWithTags => TOUCH_WITH_TAGS,
            StoreScript::RemoveByTag => REMOVE_BY_TAG,
        }
    }

    /// Minimum number of KEYS the script reads
    pub fn min_keys(&self) -> usize {
        match self {
            StoreScript::GrantPermission | StoreScript::RevokePermission => 3,
            _ => 1,
        }
    }
}

// Index sets (tags, grant indices) only ever grow their TTL: a new member
// extends the set to cover itself, never shortens it for older members.
macro_rules! extend_set_ttl_lua {
    () => {
        r#"
local function extend_set_ttl(key, existed, ttl)
  if ttl <= 0 then
    redis.call('PERSIST', key)
    return
  end
  local current = redis.call('PTTL', key)
  if existed == 0 or (current >= 0 and current < ttl) then
    redis.call('PEXPIRE', key, ttl)
  end
end
"#
    };
}

const INCREMENT_WITH_TTL: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = tonumber(ARGV[1])
if count == 1 and ttl > 0 then
  redis.call('PEXPIRE', KEYS[1], ttl)
end
return {count}
"#;

const SLIDING_WINDOW: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local allowed = 0
if count < limit then
  redis.call('ZADD', key, now, ARGV[4])
  redis.call('PEXPIRE', key, window)
  count = count + 1
  allowed = 1
end
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_ms = now
if oldest[2] then
  oldest_ms = tonumber(oldest[2])
end
return {allowed, count, oldest_ms}
"#;

const SLIDING_WINDOW_PEEK: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_ms = now
if oldest[2] then
  oldest_ms = tonumber(oldest[2])
end
return {count, oldest_ms}
"#;

const FIXED_WINDOW: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local limit = tonumber(ARGV[2])
if current >= limit then
  return {0, current, redis.call('PTTL', KEYS[1])}
end
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return {1, count, redis.call('PTTL', KEYS[1])}
"#;

const GRANT_PERMISSION: &str = concat!(
    extend_set_ttl_lua!(),
    r#"
local ttl = tonumber(ARGV[2])
redis.call('SET', KEYS[1], ARGV[1], 'PX', ttl)
for i = 2, 3 do
  local existed = redis.call('EXISTS', KEYS[i])
  redis.call('SADD', KEYS[i], ARGV[3])
  extend_set_ttl(KEYS[i], existed, ttl)
end
return {1}
"#
);

const REVOKE_PERMISSION: &str = r#"
local removed = redis.call('DEL', KEYS[1])
redis.call('SREM', KEYS[2], ARGV[1])
redis.call('SREM', KEYS[3], ARGV[1])
return {removed}
"#;

const SET_WITH_TAGS: &str = concat!(
    extend_set_ttl_lua!(),
    r#"
local ttl = tonumber(ARGV[2])
if ttl > 0 then
  redis.call('SET', KEYS[1], ARGV[1], 'PX', ttl)
else
  redis.call('SET', KEYS[1], ARGV[1])
end
for i = 2, #KEYS do
  local existed = redis.call('EXISTS', KEYS[i])
  redis.call('SADD', KEYS[i], ARGV[3])
  extend_set_ttl(KEYS[i], existed, ttl)
end
return {#KEYS - 1}
"#
);

const TOUCH_WITH_TAGS: &str = concat!(
    extend_set_ttl_lua!(),
    r#"
local ttl = tonumber(ARGV[1])
local existed = redis.call('PEXPIRE', KEYS[1], ttl)
if existed == 1 then
  for i = 2, #KEYS do
    extend_set_ttl(KEYS[i], redis.call('EXISTS', KEYS[i]), ttl)
  end
end
return {existed}
"#
);

const REMOVE_BY_TAG: &str = r#"
local members = redis.call('SMEMBERS', KEYS[1])
local removed = 0
for _, member in ipairs(members) do
  removed = removed + redis.call('DEL', member)
end
redis.call('DEL', KEYS[1])
return {removed}
"#;

/// Atomic store contract.
///
/// Implementations must be safe to share across request tasks. Errors are
/// returned as-is; the fail-open/fail-closed decision belongs to the caller.
#[async_trait]
pub trait AtomicStore: Send + Sync {
    /// Increment a counter; `ttl` is applied only when the counter goes 0 -> 1
    async fn increment(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CoordinationError> {
        let ttl_ms = ttl.map(duration_millis).unwrap_or(0);
        let reply = self
            .execute_atomic(StoreScript::IncrementWithTtl, &[key.to_string()], &[ttl_ms.to_string()])
            .await?;
        let [count] = expect_reply::<1>(StoreScript::IncrementWithTtl, &reply)?;
        Ok(count)
    }

    async fn exists(&self, key: &str) -> Result<bool, CoordinationError>;

    /// Set a TTL on an existing key; false when the key is missing
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CoordinationError>;

    /// Remaining TTL; `None` when the key is missing or has no expiry
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CoordinationError>;

    async fn delete(&self, key: &str) -> Result<bool, CoordinationError>;

    async fn delete_many(&self, keys: &[String]) -> Result<u64, CoordinationError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CoordinationError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CoordinationError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CoordinationError>;

    /// All live keys starting with `prefix` (case-sensitive)
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CoordinationError>;

    async fn execute_atomic(
        &self,
        script: StoreScript,
        keys: &[String],
        args: &[String],
    ) -> Result<Vec<i64>, CoordinationError>;

    async fn ping(&self) -> Result<(), CoordinationError>;

    fn backend_name(&self) -> &'static str;
}

/// Check a script reply has exactly `N` integers
pub fn expect_reply<const N: usize>(script: StoreScript, reply: &[i64]) -> Result<[i64; N], CoordinationError> {
    <[i64; N]>::try_from(reply).map_err(|_| {
        CoordinationError::ScriptResult(format!(
            "{} returned {} values, expected {}",
            script.name(),
            reply.len(),
            N
        ))
    })
}

/// Milliseconds in a duration, at least 1 so a zero window still expires
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}
