//! Atomic limiter scripts and their call arguments.

use std::fmt;

/// The server-side scripts a limiter can run.
///
/// The Lua sources live in `scripts/` and are compiled into the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimiterScript {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
}

impl LimiterScript {
    pub const ALL: [LimiterScript; 3] = [
        LimiterScript::FixedWindow,
        LimiterScript::SlidingWindow,
        LimiterScript::TokenBucket,
    ];

    /// Short name, also used as the key namespace of the script's records.
    pub fn name(&self) -> &'static str {
        match self {
            LimiterScript::FixedWindow => "fixed_window",
            LimiterScript::SlidingWindow => "sliding_window",
            LimiterScript::TokenBucket => "token_bucket",
        }
    }

    /// Lua source of the script.
    pub fn source(&self) -> &'static str {
        match self {
            LimiterScript::FixedWindow => include_str!("../../scripts/fixed_window.lua"),
            LimiterScript::SlidingWindow => include_str!("../../scripts/sliding_window.lua"),
            LimiterScript::TokenBucket => include_str!("../../scripts/token_bucket.lua"),
        }
    }
}

impl fmt::Display for LimiterScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arguments of one script run.
///
/// Passed to Redis as `KEYS[1]` and `ARGV[1..4]` in field order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCall {
    /// Fully qualified store key of the counter record
    pub key: String,
    /// Requests admitted per interval (bucket capacity for the token bucket)
    pub max_attempts: u32,
    /// Interval length in milliseconds, also the record's time to live
    pub interval_ms: u64,
    /// Caller wall clock in epoch milliseconds
    pub now_ms: i64,
    /// Unique member recorded by the sliding window log
    pub member: String,
}

impl ScriptCall {
    pub fn new(key: impl Into<String>, max_attempts: u32, interval_ms: u64, now_ms: i64) -> Self {
        Self {
            key: key.into(),
            max_attempts,
            interval_ms,
            now_ms,
            member: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Interval as a signed millisecond offset, clamped to `i64::MAX`.
    pub(crate) fn interval_millis(&self) -> i64 {
        i64::try_from(self.interval_ms).unwrap_or(i64::MAX)
    }
}
