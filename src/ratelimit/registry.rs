//! Limiter registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use super::limiter::RateLimiter;
use super::policy::LimiterType;
use super::token_bucket::TokenBucketRateLimiter;
use super::window::{FixedWindowRateLimiter, SlidingWindowRateLimiter};
use crate::clock::Clock;
use crate::error::{RedlimitError, Result};
use crate::store::CounterStore;

/// Maps each [`LimiterType`] to the limiter serving it.
///
/// Built once at startup and read-only afterwards.
pub struct LimiterRegistry {
    limiters: HashMap<LimiterType, Arc<dyn RateLimiter>>,
}

impl LimiterRegistry {
    /// Build a registry from limiters that declare their own type.
    ///
    /// When two limiters declare the same type the later one wins.
    pub fn new(limiters: Vec<Arc<dyn RateLimiter>>) -> Self {
        let mut map: HashMap<LimiterType, Arc<dyn RateLimiter>> = HashMap::new();
        for limiter in limiters {
            let limiter_type = limiter.limiter_type();
            if map.insert(limiter_type, limiter).is_some() {
                warn!(limiter_type = %limiter_type, "Replacing registered rate limiter");
            }
        }
        Self { limiters: map }
    }

    /// Register the three built-in algorithms over one shared store.
    pub fn with_store(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, key_prefix: &str) -> Self {
        let limiters: Vec<Arc<dyn RateLimiter>> = vec![
            Arc::new(
                FixedWindowRateLimiter::new(store.clone(), clock.clone()).with_key_prefix(key_prefix),
            ),
            Arc::new(
                SlidingWindowRateLimiter::new(store.clone(), clock.clone())
                    .with_key_prefix(key_prefix),
            ),
            Arc::new(TokenBucketRateLimiter::new(store, clock).with_key_prefix(key_prefix)),
        ];
        let registry = Self::new(limiters);
        info!(limiters = ?registry.supported_types(), key_prefix, "Rate limiters registered");
        registry
    }

    /// The limiter serving `limiter_type`.
    pub fn get_by_limiter_type(&self, limiter_type: LimiterType) -> Result<Arc<dyn RateLimiter>> {
        self.limiters.get(&limiter_type).cloned().ok_or_else(|| {
            RedlimitError::Config(format!("no rate limiter registered for {}", limiter_type))
        })
    }

    /// Fail unless every type in `limiter_types` has a limiter.
    ///
    /// Run at startup so that lookups for configured policies cannot fail
    /// while serving requests.
    pub fn ensure_supports<I>(&self, limiter_types: I) -> Result<()>
    where
        I: IntoIterator<Item = LimiterType>,
    {
        for limiter_type in limiter_types {
            self.get_by_limiter_type(limiter_type)?;
        }
        Ok(())
    }

    /// Registered types, in declaration order of [`LimiterType`].
    pub fn supported_types(&self) -> Vec<LimiterType> {
        LimiterType::ALL
            .into_iter()
            .filter(|t| self.limiters.contains_key(t))
            .collect()
    }
}

impl fmt::Debug for LimiterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("limiters", &self.supported_types())
            .finish()
    }
}
