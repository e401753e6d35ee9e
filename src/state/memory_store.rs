// Same-process fallback store: best-effort, single instance, Clock-driven expiry

use crate::core::clock::{Clock, SystemClock};
use crate::core::errors::CoordinationError;
use crate::state::store::{AtomicStore, StoreScript};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Set(BTreeSet<String>),
    Sorted(BTreeSet<(i64, String)>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Slot {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// In-process implementation of [`AtomicStore`].
///
/// Every operation holds one lock over the whole keyspace, so scripts are
/// atomic with respect to other callers in this process only. It exists to
/// keep the core degrading gracefully while the shared store is down and as
/// a deterministic backend for tests.
#[derive(Debug)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Slot>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|slot| !slot.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every expired key; returns how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, slot| !slot.is_expired(now));
        before - entries.len()
    }
}

/// Locked view of the keyspace at one instant
struct Keyspace<'a> {
    map: &'a mut HashMap<String, Slot>,
    now: DateTime<Utc>,
}

impl<'a> Keyspace<'a> {
    fn slot(&mut self, key: &str) -> Option<&mut Slot> {
        if self.map.get(key).map_or(false, |slot| slot.is_expired(self.now)) {
            self.map.remove(key);
        }
        self.map.get_mut(key)
    }

    fn exists(&mut self, key: &str) -> bool {
        self.slot(key).is_some()
    }

    fn pexpire(&mut self, key: &str, ttl_ms: i64) -> bool {
        let at = expiry(self.now, ttl_ms);
        match self.slot(key) {
            Some(slot) => {
                slot.expires_at = at;
                true
            }
            None => false,
        }
    }

    fn persist(&mut self, key: &str) {
        if let Some(slot) = self.slot(key) {
            slot.expires_at = None;
        }
    }

    /// Milliseconds left: -2 when missing, -1 when persistent
    fn pttl(&mut self, key: &str) -> i64 {
        let now = self.now;
        match self.slot(key) {
            None => -2,
            Some(Slot { expires_at: None, .. }) => -1,
            Some(Slot { expires_at: Some(at), .. }) => (*at - now).num_milliseconds().max(0),
        }
    }

    fn del(&mut self, key: &str) -> bool {
        let live = self.exists(key);
        self.map.remove(key);
        live
    }

    fn text(&mut self, key: &str) -> Result<Option<String>, CoordinationError> {
        match self.slot(key) {
            None => Ok(None),
            Some(Slot { value: Value::Text(text), .. }) => Ok(Some(text.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn set_text(&mut self, key: &str, value: &str, ttl_ms: Option<i64>) {
        let expires_at = ttl_ms.and_then(|ms| expiry(self.now, ms));
        self.map.insert(
            key.to_string(),
            Slot {
                value: Value::Text(value.to_string()),
                expires_at,
            },
        );
    }

    fn counter(&mut self, key: &str) -> Result<i64, CoordinationError> {
        match self.text(key)? {
            None => Ok(0),
            Some(text) => text
                .parse::<i64>()
                .map_err(|_| CoordinationError::ScriptResult(format!("value at {} is not an integer", key))),
        }
    }

    /// INCR semantics: keeps any existing expiry
    fn incr(&mut self, key: &str) -> Result<i64, CoordinationError> {
        let next = self.counter(key)? + 1;
        match self.slot(key) {
            Some(slot) => slot.value = Value::Text(next.to_string()),
            None => self.set_text(key, &next.to_string(), None),
        }
        Ok(next)
    }

    fn members(&mut self, key: &str) -> Result<Vec<String>, CoordinationError> {
        match self.slot(key) {
            None => Ok(Vec::new()),
            Some(Slot { value: Value::Set(set), .. }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn sadd(&mut self, key: &str, member: &str) -> Result<(), CoordinationError> {
        match self.slot(key) {
            Some(Slot { value: Value::Set(set), .. }) => {
                set.insert(member.to_string());
                Ok(())
            }
            Some(_) => Err(wrong_type(key)),
            None => {
                self.map.insert(
                    key.to_string(),
                    Slot {
                        value: Value::Set(BTreeSet::from([member.to_string()])),
                        expires_at: None,
                    },
                );
                Ok(())
            }
        }
    }

    fn srem(&mut self, key: &str, member: &str) -> Result<(), CoordinationError> {
        let emptied = match self.slot(key) {
            Some(Slot { value: Value::Set(set), .. }) => {
                set.remove(member);
                set.is_empty()
            }
            Some(_) => return Err(wrong_type(key)),
            None => false,
        };
        if emptied {
            self.map.remove(key);
        }
        Ok(())
    }

    /// Grow-only TTL on index sets; a zero TTL makes the set persistent
    fn extend_set_ttl(&mut self, key: &str, existed: bool, ttl_ms: i64) {
        if ttl_ms <= 0 {
            self.persist(key);
            return;
        }
        let current = self.pttl(key);
        if !existed || (current >= 0 && current < ttl_ms) {
            self.pexpire(key, ttl_ms);
        }
    }

    /// Sorted timestamp set with entries at or before `cutoff` dropped
    fn window(&mut self, key: &str, cutoff: i64) -> Result<&mut BTreeSet<(i64, String)>, CoordinationError> {
        if self.slot(key).is_none() {
            self.map.insert(
                key.to_string(),
                Slot {
                    value: Value::Sorted(BTreeSet::new()),
                    expires_at: None,
                },
            );
        }
        match self.map.get_mut(key) {
            Some(Slot { value: Value::Sorted(set), .. }) => {
                set.retain(|(score, _)| *score > cutoff);
                Ok(set)
            }
            _ => Err(wrong_type(key)),
        }
    }

    fn drop_if_empty_window(&mut self, key: &str) {
        if matches!(self.map.get(key), Some(Slot { value: Value::Sorted(set), .. }) if set.is_empty()) {
            self.map.remove(key);
        }
    }

    fn run(&mut self, script: StoreScript, keys: &[String], args: &[String]) -> Result<Vec<i64>, CoordinationError> {
        if keys.len() < script.min_keys() {
            return Err(CoordinationError::ScriptResult(format!(
                "{} needs {} keys, got {}",
                script.name(),
                script.min_keys(),
                keys.len()
            )));
        }
        let key = keys[0].as_str();

        match script {
            StoreScript::IncrementWithTtl => {
                let ttl = int_arg(script, args, 0)?;
                let count = self.incr(key)?;
                if count == 1 && ttl > 0 {
                    self.pexpire(key, ttl);
                }
                Ok(vec![count])
            }
            StoreScript::SlidingWindow => {
                let now_ms = int_arg(script, args, 0)?;
                let window_ms = int_arg(script, args, 1)?;
                let limit = int_arg(script, args, 2)?;
                let member = str_arg(script, args, 3)?;

                let set = self.window(key, now_ms - window_ms)?;
                let mut count = set.len() as i64;
                let mut allowed = 0;
                if count < limit {
                    set.insert((now_ms, member.to_string()));
                    count += 1;
                    allowed = 1;
                }
                let oldest = set.iter().next().map_or(now_ms, |(score, _)| *score);
                if allowed == 1 {
                    self.pexpire(key, window_ms);
                }
                self.drop_if_empty_window(key);
                Ok(vec![allowed, count, oldest])
            }
            StoreScript::SlidingWindowPeek => {
                let now_ms = int_arg(script, args, 0)?;
                let window_ms = int_arg(script, args, 1)?;
                let set = self.window(key, now_ms - window_ms)?;
                let count = set.len() as i64;
                let oldest = set.iter().next().map_or(now_ms, |(score, _)| *score);
                self.drop_if_empty_window(key);
                Ok(vec![count, oldest])
            }
            StoreScript::FixedWindow => {
                let window_ms = int_arg(script, args, 0)?;
                let limit = int_arg(script, args, 1)?;
                let current = self.counter(key)?;
                if current >= limit {
                    return Ok(vec![0, current, self.pttl(key)]);
                }
                let count = self.incr(key)?;
                if count == 1 {
                    self.pexpire(key, window_ms);
                }
                Ok(vec![1, count, self.pttl(key)])
            }
            StoreScript::GrantPermission => {
                let record = str_arg(script, args, 0)?;
                let ttl = int_arg(script, args, 1)?;
                let member = str_arg(script, args, 2)?;
                self.set_text(key, record, Some(ttl));
                for index in &keys[1..3] {
                    let existed = self.exists(index);
                    self.sadd(index, member)?;
                    self.extend_set_ttl(index, existed, ttl);
                }
                Ok(vec![1])
            }
            StoreScript::RevokePermission => {
                let member = str_arg(script, args, 0)?;
                let removed = self.del(key) as i64;
                self.srem(&keys[1], member)?;
                self.srem(&keys[2], member)?;
                Ok(vec![removed])
            }
            StoreScript::SetWithTags => {
                let value = str_arg(script, args, 0)?;
                let ttl = int_arg(script, args, 1)?;
                let member = str_arg(script, args, 2)?;
                self.set_text(key, value, (ttl > 0).then_some(ttl));
                for tag in &keys[1..] {
                    let existed = self.exists(tag);
                    self.sadd(tag, member)?;
                    self.extend_set_ttl(tag, existed, ttl);
                }
                Ok(vec![keys.len() as i64 - 1])
            }
            StoreScript::TouchWithTags => {
                let ttl = int_arg(script, args, 0)?;
                let existed = self.pexpire(key, ttl);
                if existed {
                    for tag in &keys[1..] {
                        let tag_existed = self.exists(tag);
                        self.extend_set_ttl(tag, tag_existed, ttl);
                    }
                }
                Ok(vec![existed as i64])
            }
            StoreScript::RemoveByTag => {
                let members = self.members(key)?;
                let removed = members.iter().filter(|member| self.del(member)).count() as i64;
                self.map.remove(key);
                Ok(vec![removed])
            }
        }
    }
}

fn wrong_type(key: &str) -> CoordinationError {
    CoordinationError::ScriptResult(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {}",
        key
    ))
}

fn str_arg<'a>(script: StoreScript, args: &'a [String], idx: usize) -> Result<&'a str, CoordinationError> {
    args.get(idx)
        .map(String::as_str)
        .ok_or_else(|| CoordinationError::ScriptResult(format!("{} missing argument {}", script.name(), idx + 1)))
}

fn int_arg(script: StoreScript, args: &[String], idx: usize) -> Result<i64, CoordinationError> {
    let raw = str_arg(script, args, idx)?;
    raw.parse::<i64>().map_err(|_| {
        CoordinationError::ScriptResult(format!(
            "{} argument {} is not an integer: {}",
            script.name(),
            idx + 1,
            raw
        ))
    })
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Expiry instant for a TTL; beyond the representable range the key never expires
fn expiry(now: DateTime<Utc>, ttl_ms: i64) -> Option<DateTime<Utc>> {
    now.checked_add_signed(chrono::Duration::milliseconds(ttl_ms.max(0)))
}

#[async_trait]
impl AtomicStore for InMemoryStore {
    async fn exists(&self, key: &str) -> Result<bool, CoordinationError> {
        let now = self.clock.now();
        let mut map = self.entries.lock().await;
        Ok(Keyspace { map: &mut map, now }.exists(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CoordinationError> {
        let now = self.clock.now();
        let mut map = self.entries.lock().await;
        Ok(Keyspace { map: &mut map, now }.pexpire(key, millis(ttl)))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CoordinationError> {
        let now = self.clock.now();
        let mut map = self.entries.lock().await;
        let pttl = Keyspace { map: &mut map, now }.pttl(key);
        Ok((pttl >= 0).then(|| Duration::from_millis(pttl as u64)))
    }

    async fn delete(&self, key: &str) -> Result<bool, CoordinationError> {
        let now = self.clock.now();
        let mut map = self.entries.lock().await;
        Ok(Keyspace { map: &mut map, now }.del(key))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, CoordinationError> {
        let now = self.clock.now();
        let mut map = self.entries.lock().await;
        let mut space = Keyspace { map: &mut map, now };
        Ok(keys.iter().filter(|key| space.del(key)).count() as u64)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        let now = self.clock.now();
        let mut map = self.entries.lock().await;
        Keyspace { map: &mut map, now }.text(key)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CoordinationError> {
        let now = self.clock.now();
        let mut map = self.entries.lock().await;
        Keyspace { map: &mut map, now }.set_text(key, value, ttl.map(millis));
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CoordinationError> {
        let now = self.clock.now();
        let mut map = self.entries.lock().await;
        Keyspace { map: &mut map, now }.members(key)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CoordinationError> {
        let now = self.clock.now();
        let map = self.entries.lock().await;
        let mut keys: Vec<String> = map
            .iter()
            .filter(|(key, slot)| key.starts_with(prefix) && !slot.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn execute_atomic(
        &self,
        script: StoreScript,
        keys: &[String],
        args: &[String],
    ) -> Result<Vec<i64>, CoordinationError> {
        let now = self.clock.now();
        let mut map = self.entries.lock().await;
        Keyspace { map: &mut map, now }.run(script, keys, args)
    }

    async fn ping(&self) -> Result<(), CoordinationError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
