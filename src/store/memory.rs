//! In-process counter store.
//!
//! Runs the same algorithms as the Lua scripts, with the record's dashmap
//! shard lock held for the whole check-and-update. Only processes sharing
//! one `MemoryStore` instance share quotas.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use super::{CounterStore, LimiterScript, ScriptCall, StoreError, StoreResult};
use crate::clock::{Clock, SystemClock};

/// Expired records are swept roughly once per this many script runs.
const EVICTION_INTERVAL: u64 = 128;

#[derive(Debug)]
enum Record {
    Counter(u64),
    Log(VecDeque<i64>),
    Bucket { tokens: f64, refilled_at_ms: i64 },
}

#[derive(Debug, Default)]
struct Slot {
    record: Option<Record>,
    expires_at_ms: i64,
}

impl Slot {
    fn is_live(&self, now_ms: i64) -> bool {
        self.record.is_some() && self.expires_at_ms > now_ms
    }

    fn wrong_type(call: &ScriptCall) -> StoreError {
        StoreError::WrongType {
            key: call.key.clone(),
        }
    }

    /// Mirrors `scripts/fixed_window.lua`: expiry is set only when the
    /// counter is created (`if current == 1`).
    fn fixed_window(&mut self, call: &ScriptCall) -> StoreResult<bool> {
        if self.record.is_none() {
            self.record = Some(Record::Counter(1));
            self.expires_at_ms = call.now_ms.saturating_add(call.interval_millis());
            return Ok(true);
        }

        let Some(Record::Counter(count)) = self.record.as_mut() else {
            return Err(Self::wrong_type(call));
        };
        if *count >= u64::from(call.max_attempts) {
            return Ok(false);
        }
        *count += 1;
        Ok(true)
    }

    /// Mirrors `scripts/sliding_window.lua`. `ZREMRANGEBYSCORE -inf
    /// (now - window)` drops boundary entries, hence `> window_start` here.
    fn sliding_window(&mut self, call: &ScriptCall) -> StoreResult<bool> {
        let window_start = call.now_ms.saturating_sub(call.interval_millis());
        let Record::Log(log) = self
            .record
            .get_or_insert_with(|| Record::Log(VecDeque::new()))
        else {
            return Err(Self::wrong_type(call));
        };

        log.retain(|&admitted_at| admitted_at > window_start);
        if log.len() >= call.max_attempts as usize {
            return Ok(false);
        }

        log.push_back(call.now_ms);
        self.expires_at_ms = call.now_ms.saturating_add(call.interval_millis());
        Ok(true)
    }

    /// Mirrors `scripts/token_bucket.lua`, including the write-back and
    /// expiry refresh on denial.
    fn token_bucket(&mut self, call: &ScriptCall) -> StoreResult<bool> {
        let capacity = f64::from(call.max_attempts);
        let Record::Bucket {
            tokens,
            refilled_at_ms,
        } = self.record.get_or_insert(Record::Bucket {
            tokens: capacity,
            refilled_at_ms: call.now_ms,
        })
        else {
            return Err(Self::wrong_type(call));
        };

        let elapsed = call.now_ms.saturating_sub(*refilled_at_ms).max(0) as f64;
        let mut available = (*tokens + elapsed * capacity / call.interval_ms as f64).min(capacity);

        let allowed = available >= 1.0;
        if allowed {
            available -= 1.0;
        }

        *tokens = available;
        *refilled_at_ms = call.now_ms;
        self.expires_at_ms = call.now_ms.saturating_add(call.interval_millis());
        Ok(allowed)
    }
}

/// Counter store kept in process memory.
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
    ops_counter: AtomicU64,
}

impl MemoryStore {
    /// Create a store that expires records by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a store that expires records by `clock`.
    ///
    /// Script runs use the timestamp carried by the call; `clock` only
    /// drives [`CounterStore::ttl`] and [`CounterStore::remove`].
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: DashMap::new(),
            clock,
            ops_counter: AtomicU64::new(0),
        }
    }

    /// Number of records that have not expired yet.
    pub fn record_count(&self) -> usize {
        let now = self.clock.now_millis();
        self.slots.iter().filter(|slot| slot.is_live(now)).count()
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.slots.clear();
    }

    fn maybe_evict_expired(&self, now_ms: i64) {
        let count = self.ops_counter.fetch_add(1, Ordering::Relaxed);
        if count % EVICTION_INTERVAL != 0 {
            return;
        }
        self.slots.retain(|_, slot| slot.is_live(now_ms));
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn eval(&self, script: LimiterScript, call: &ScriptCall) -> StoreResult<bool> {
        if call.interval_ms == 0 {
            return Err(StoreError::InvalidArgument(
                "interval must be positive".to_string(),
            ));
        }
        self.maybe_evict_expired(call.now_ms);

        let mut slot = self.slots.entry(call.key.clone()).or_default();
        if !slot.is_live(call.now_ms) {
            *slot = Slot::default();
        }

        let allowed = match script {
            LimiterScript::FixedWindow => slot.fixed_window(call)?,
            LimiterScript::SlidingWindow => slot.sliding_window(call)?,
            LimiterScript::TokenBucket => slot.token_bucket(call)?,
        };

        trace!(key = %call.key, script = %script, allowed, "Ran script in memory");
        Ok(allowed)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = self.clock.now_millis();
        Ok(self
            .slots
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| Duration::from_millis((slot.expires_at_ms - now) as u64)))
    }

    async fn remove(&self, key: &str) -> StoreResult<bool> {
        let now = self.clock.now_millis();
        Ok(self
            .slots
            .remove(key)
            .is_some_and(|(_, slot)| slot.is_live(now)))
    }
}
