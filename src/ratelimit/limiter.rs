//! Script-backed limiter primitive.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::policy::LimiterType;
use crate::clock::Clock;
use crate::store::{CounterStore, LimiterScript, ScriptCall, StoreError, StoreResult};

/// Prefix of every counter record key unless configured otherwise.
pub const DEFAULT_KEY_PREFIX: &str = "rate_limiter:";

/// A rate limiting algorithm.
///
/// Implementations self-declare the [`LimiterType`] they serve so a
/// [`LimiterRegistry`](super::LimiterRegistry) can be built from a plain list.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// The limiter type this implementation serves.
    fn limiter_type(&self) -> LimiterType;

    /// Try to admit one request for `key`.
    ///
    /// Returns `Ok(false)` when the quota is used up. Store failures are
    /// returned as errors, never as a denial.
    async fn try_acquire(&self, key: &str, max_attempts: u32, interval_secs: u64)
        -> StoreResult<bool>;

    /// Remaining lifetime of the counter record behind `key`.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Drop the counter record behind `key`, restoring the full quota.
    async fn reset(&self, key: &str) -> StoreResult<bool>;
}

/// Runs one atomic script per check against a shared [`CounterStore`].
///
/// The quota key is namespaced by script, so two algorithms throttling the
/// same path never touch each other's records.
pub struct ScriptLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    script: LimiterScript,
    key_prefix: String,
}

impl ScriptLimiter {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, script: LimiterScript) -> Self {
        Self {
            store,
            clock,
            script,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn script(&self) -> LimiterScript {
        self.script
    }

    /// Store key of the counter record for a quota key.
    ///
    /// Format: `{prefix}{script}:{quota key}`
    pub fn store_key(&self, key: &str) -> String {
        format!("{}{}:{}", self.key_prefix, self.script.name(), key)
    }

    /// Run the check-and-update script for `key`.
    pub async fn try_acquire(
        &self,
        key: &str,
        max_attempts: u32,
        interval_secs: u64,
    ) -> StoreResult<bool> {
        if max_attempts == 0 {
            return Err(StoreError::InvalidArgument(
                "max_attempts must be greater than zero".to_string(),
            ));
        }
        let interval_ms = match interval_secs.checked_mul(1_000) {
            Some(ms) if ms > 0 && ms <= i64::MAX as u64 => ms,
            _ => {
                return Err(StoreError::InvalidArgument(format!(
                    "interval of {} seconds is out of range",
                    interval_secs
                )))
            }
        };

        let call = ScriptCall::new(
            self.store_key(key),
            max_attempts,
            interval_ms,
            self.clock.now_millis(),
        );

        trace!(
            key = %call.key,
            script = %self.script,
            max_attempts,
            interval_secs,
            "Checking rate limit"
        );

        let admitted = self.store.eval(self.script, &call).await?;
        if !admitted {
            debug!(
                key = %call.key,
                script = %self.script,
                max_attempts,
                "Rate limit exceeded"
            );
        }
        Ok(admitted)
    }

    pub async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.store.ttl(&self.store_key(key)).await
    }

    pub async fn reset(&self, key: &str) -> StoreResult<bool> {
        let removed = self.store.remove(&self.store_key(key)).await?;
        debug!(key = %key, script = %self.script, removed, "Reset rate limit counter");
        Ok(removed)
    }
}

/// Define a [`RateLimiter`] that always runs the script of `$limiter_type`.
///
/// The wrapper owns its [`ScriptLimiter`], so the declared type and the
/// script it runs cannot disagree.
macro_rules! script_limiter {
    ($(#[$meta:meta])* $name:ident, $limiter_type:expr) => {
        $(#[$meta])*
        pub struct $name {
            inner: $crate::ratelimit::limiter::ScriptLimiter,
        }

        impl $name {
            pub fn new(
                store: ::std::sync::Arc<dyn $crate::store::CounterStore>,
                clock: ::std::sync::Arc<dyn $crate::clock::Clock>,
            ) -> Self {
                Self {
                    inner: $crate::ratelimit::limiter::ScriptLimiter::new(
                        store,
                        clock,
                        $limiter_type.script(),
                    ),
                }
            }

            /// Store records under `key_prefix` instead of the default.
            pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
                self.inner = self.inner.with_key_prefix(key_prefix);
                self
            }
        }

        #[::async_trait::async_trait]
        impl $crate::ratelimit::limiter::RateLimiter for $name {
            fn limiter_type(&self) -> $crate::ratelimit::policy::LimiterType {
                $limiter_type
            }

            async fn try_acquire(
                &self,
                key: &str,
                max_attempts: u32,
                interval_secs: u64,
            ) -> $crate::store::StoreResult<bool> {
                self.inner.try_acquire(key, max_attempts, interval_secs).await
            }

            async fn ttl(
                &self,
                key: &str,
            ) -> $crate::store::StoreResult<Option<::std::time::Duration>> {
                self.inner.ttl(key).await
            }

            async fn reset(&self, key: &str) -> $crate::store::StoreResult<bool> {
                self.inner.reset(key).await
            }
        }
    };
}

pub(crate) use script_limiter;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn limiter(script: LimiterScript) -> (ScriptLimiter, Arc<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = ScriptLimiter::new(store.clone(), clock.clone(), script);
        (limiter, store, clock)
    }

    #[test]
    fn test_store_key_is_namespaced_by_script() {
        let (limiter, _, _) = limiter(LimiterScript::TokenBucket);
        assert_eq!(limiter.store_key("/orders"), "rate_limiter:token_bucket:/orders");

        let limiter = limiter.with_key_prefix("app:");
        assert_eq!(limiter.store_key("/orders"), "app:token_bucket:/orders");
    }

    #[tokio::test]
    async fn test_try_acquire_denies_after_max() {
        let (limiter, _, _) = limiter(LimiterScript::FixedWindow);

        for _ in 0..5 {
            assert!(limiter.try_acquire("/orders", 5, 1).await.unwrap());
        }
        assert!(!limiter.try_acquire("/orders", 5, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_try_acquire_sets_expiry() {
        let (limiter, _, clock) = limiter(LimiterScript::SlidingWindow);

        limiter.try_acquire("/orders", 5, 30).await.unwrap();
        assert_eq!(
            limiter.ttl("/orders").await.unwrap(),
            Some(Duration::from_secs(30))
        );

        clock.advance(Duration::from_secs(30));
        assert_eq!(limiter.ttl("/orders").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected_before_store() {
        let (limiter, store, _) = limiter(LimiterScript::FixedWindow);

        let result = limiter.try_acquire("/orders", 0, 10).await;
        assert!(matches!(result, Err(StoreError::InvalidArgument(_))));

        let result = limiter.try_acquire("/orders", 5, 0).await;
        assert!(matches!(result, Err(StoreError::InvalidArgument(_))));

        let result = limiter.try_acquire("/orders", 5, u64::MAX).await;
        assert!(matches!(result, Err(StoreError::InvalidArgument(_))));

        // Fits in u64 milliseconds but not in a signed Redis expiry
        let result = limiter
            .try_acquire("/orders", 5, i64::MAX as u64 / 1_000 + 1)
            .await;
        assert!(matches!(result, Err(StoreError::InvalidArgument(_))));

        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_reset_restores_quota() {
        let (limiter, _, _) = limiter(LimiterScript::FixedWindow);

        assert!(limiter.try_acquire("/orders", 1, 60).await.unwrap());
        assert!(!limiter.try_acquire("/orders", 1, 60).await.unwrap());

        assert!(limiter.reset("/orders").await.unwrap());
        assert!(limiter.try_acquire("/orders", 1, 60).await.unwrap());
    }
}
