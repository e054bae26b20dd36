//! Token bucket strategy.
//!
//! Each key owns a bucket holding up to `max_attempts` tokens, refilled at
//! `max_attempts / interval_secs` tokens per second. A request takes one
//! token or is denied. Refill, comparison and debit run inside one script,
//! so two concurrent requests can never both take the last token.

use super::limiter::script_limiter;
use super::policy::LimiterType;

script_limiter! {
    /// Bursty limiter with a steady refill rate.
    TokenBucketRateLimiter, LimiterType::TokenBucket
}

impl TokenBucketRateLimiter {
    /// Tokens added per second for a bucket of `max_attempts` refilled over
    /// `interval_secs`.
    pub fn refill_rate(max_attempts: u32, interval_secs: u64) -> f64 {
        f64::from(max_attempts) / interval_secs as f64
    }
}
