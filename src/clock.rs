//! Time sources for limiter scripts.
//!
//! Every script run is stamped with the caller's wall clock in epoch
//! milliseconds, so the same arithmetic runs in Redis and in the in-memory
//! store. Tests swap in a [`ManualClock`] to step time deterministically.

use std::time::Duration;

use parking_lot::RwLock;

/// A source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// System clock backed by `chrono::Utc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: RwLock<i64>,
}

impl ManualClock {
    /// Create a clock frozen at `start_ms`.
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: RwLock::new(start_ms),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now_ms.write();
        *now = now.saturating_add(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX));
    }

    /// Jump to an absolute instant.
    pub fn set_millis(&self, now_ms: i64) {
        *self.now_ms.write() = now_ms;
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        *self.now_ms.read()
    }
}
