//! Shared counter store boundary.
//!
//! Limiters never read and then write a counter record as two separate
//! operations. They hand a [`LimiterScript`] and its scalar arguments to a
//! [`CounterStore`], which runs the whole check-and-update as one atomic
//! step: a Lua script on Redis, or a per-key locked section in memory.

mod memory;
mod redis_store;
mod script;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use script::{LimiterScript, ScriptCall};

/// Errors raised by a counter store.
///
/// None of these mean "denied"; a denial is `Ok(false)` from
/// [`CounterStore::eval`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The Redis server could not be reached or rejected the command.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The record at `key` was written by a different script.
    #[error("Record at {key} holds a different counter type")]
    WrongType { key: String },

    /// The script arguments are out of range.
    #[error("Invalid script argument: {0}")]
    InvalidArgument(String),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A store holding counter records shared by every limiter process.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically run `script` against the record at `call.key`.
    ///
    /// Returns whether the request was admitted.
    async fn eval(&self, script: LimiterScript, call: &ScriptCall) -> StoreResult<bool>;

    /// Remaining time to live of a record, `None` if it does not exist.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Delete a record. Returns whether a record was removed.
    async fn remove(&self, key: &str) -> StoreResult<bool>;
}
