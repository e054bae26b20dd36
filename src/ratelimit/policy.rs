//! Declared rate limit policies.
//!
//! A policy is attached to a handler (method level) or a controller (class
//! level) and read on every request that reaches it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{RedlimitError, Result};
use crate::store::LimiterScript;

/// Name of the key generator used when a policy does not pick one.
pub const DEFAULT_KEY_GENERATOR: &str = "default";

/// Longest enforceable interval. Scripts receive the interval in
/// milliseconds, and Redis expiries are signed 64-bit.
pub const MAX_INTERVAL_SECS: u64 = i64::MAX as u64 / 1_000;

/// Algorithm enforcing a policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterType {
    /// Counter reset when the window opened by the first request closes
    FixedWindow,
    /// Log of admissions over the trailing interval
    #[default]
    SlidingWindow,
    /// Bucket refilled continuously, allowing bursts up to its capacity
    TokenBucket,
}

impl LimiterType {
    pub const ALL: [LimiterType; 3] = [
        LimiterType::FixedWindow,
        LimiterType::SlidingWindow,
        LimiterType::TokenBucket,
    ];

    /// The atomic script implementing this algorithm.
    pub fn script(&self) -> LimiterScript {
        match self {
            LimiterType::FixedWindow => LimiterScript::FixedWindow,
            LimiterType::SlidingWindow => LimiterScript::SlidingWindow,
            LimiterType::TokenBucket => LimiterScript::TokenBucket,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.script().name()
    }
}

impl fmt::Display for LimiterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimiterType {
    type Err = String;

    /// Accepts `sliding_window`, `SLIDING_WINDOW` and `sliding-window`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        LimiterType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("unknown limiter type '{}'", s))
    }
}

/// Unit of a policy's interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl IntervalUnit {
    /// Convert `amount` of this unit to whole seconds, truncating and
    /// saturating at `u64::MAX`.
    pub fn to_seconds(&self, amount: u64) -> u64 {
        match self {
            IntervalUnit::Nanoseconds => amount / 1_000_000_000,
            IntervalUnit::Microseconds => amount / 1_000_000,
            IntervalUnit::Milliseconds => amount / 1_000,
            IntervalUnit::Seconds => amount,
            IntervalUnit::Minutes => amount.saturating_mul(60),
            IntervalUnit::Hours => amount.saturating_mul(3_600),
            IntervalUnit::Days => amount.saturating_mul(86_400),
        }
    }
}

/// A rate limit declared on a handler or controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Algorithm enforcing the limit
    #[serde(default)]
    pub limiter_type: LimiterType,
    /// Name of the key generator building the quota key
    #[serde(default = "default_key_generate")]
    pub key_generate: String,
    /// Requests admitted per interval
    pub max_attempts: u32,
    /// Interval length, in `time_unit`
    pub interval: u64,
    /// Unit of `interval`
    #[serde(default)]
    pub time_unit: IntervalUnit,
    /// Throttle each client IP separately
    #[serde(default)]
    pub ip: bool,
}

fn default_key_generate() -> String {
    DEFAULT_KEY_GENERATOR.to_string()
}

impl RateLimitPolicy {
    /// A policy admitting `max_attempts` requests every `interval_secs` seconds.
    pub fn new(limiter_type: LimiterType, max_attempts: u32, interval_secs: u64) -> Self {
        Self {
            limiter_type,
            key_generate: default_key_generate(),
            max_attempts,
            interval: interval_secs,
            time_unit: IntervalUnit::Seconds,
            ip: false,
        }
    }

    pub fn with_interval(mut self, interval: u64, time_unit: IntervalUnit) -> Self {
        self.interval = interval;
        self.time_unit = time_unit;
        self
    }

    pub fn with_key_generate(mut self, name: impl Into<String>) -> Self {
        self.key_generate = name.into();
        self
    }

    pub fn with_ip(mut self, ip: bool) -> Self {
        self.ip = ip;
        self
    }

    /// The interval normalized to seconds.
    ///
    /// Intervals shorter than one second or longer than
    /// [`MAX_INTERVAL_SECS`] cannot be enforced and are rejected.
    pub fn interval_secs(&self) -> Result<u64> {
        match self.time_unit.to_seconds(self.interval) {
            0 => Err(RedlimitError::Config(format!(
                "interval of {} {:?} is shorter than one second",
                self.interval, self.time_unit
            ))),
            secs if secs > MAX_INTERVAL_SECS => Err(RedlimitError::Config(format!(
                "interval of {} {:?} exceeds the maximum of {} seconds",
                self.interval, self.time_unit, MAX_INTERVAL_SECS
            ))),
            secs => Ok(secs),
        }
    }

    /// Check the policy can be enforced.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(RedlimitError::Config(
                "max_attempts must be greater than zero".to_string(),
            ));
        }
        if self.key_generate.is_empty() {
            return Err(RedlimitError::Config(
                "key_generate must name a key generator".to_string(),
            ));
        }
        self.interval_secs().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policy_with_defaults() {
        let yaml = r#"
max_attempts: 3
interval: 10
"#;
        let policy: RateLimitPolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.limiter_type, LimiterType::SlidingWindow);
        assert_eq!(policy.key_generate, DEFAULT_KEY_GENERATOR);
        assert_eq!(policy.time_unit, IntervalUnit::Seconds);
        assert!(!policy.ip);
        assert_eq!(policy, RateLimitPolicy::new(LimiterType::SlidingWindow, 3, 10));
    }

    #[test]
    fn test_parse_full_policy() {
        let yaml = r#"
limiter_type: token_bucket
key_generate: handler
max_attempts: 100
interval: 1
time_unit: minutes
ip: true
"#;
        let policy: RateLimitPolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.limiter_type, LimiterType::TokenBucket);
        assert_eq!(policy.key_generate, "handler");
        assert_eq!(policy.interval_secs().unwrap(), 60);
        assert!(policy.ip);
    }

    #[test]
    fn test_unknown_limiter_type_fails_to_parse() {
        let yaml = r#"
limiter_type: leaky_bucket
max_attempts: 3
interval: 10
"#;
        assert!(serde_yaml::from_str::<RateLimitPolicy>(yaml).is_err());
        assert!("leaky_bucket".parse::<LimiterType>().is_err());
    }

    #[test]
    fn test_limiter_type_from_str() {
        assert_eq!("FIXED_WINDOW".parse::<LimiterType>(), Ok(LimiterType::FixedWindow));
        assert_eq!("sliding-window".parse::<LimiterType>(), Ok(LimiterType::SlidingWindow));
        assert_eq!(" token_bucket ".parse::<LimiterType>(), Ok(LimiterType::TokenBucket));
        assert_eq!(LimiterType::TokenBucket.to_string(), "token_bucket");
    }

    #[test]
    fn test_interval_unit_conversion() {
        assert_eq!(IntervalUnit::Milliseconds.to_seconds(2_500), 2);
        assert_eq!(IntervalUnit::Seconds.to_seconds(7), 7);
        assert_eq!(IntervalUnit::Minutes.to_seconds(2), 120);
        assert_eq!(IntervalUnit::Hours.to_seconds(1), 3_600);
        assert_eq!(IntervalUnit::Days.to_seconds(1), 86_400);
        assert_eq!(IntervalUnit::Days.to_seconds(u64::MAX), u64::MAX);
    }

    #[test]
    fn test_sub_second_interval_rejected() {
        let policy = RateLimitPolicy::new(LimiterType::FixedWindow, 3, 1)
            .with_interval(500, IntervalUnit::Milliseconds);
        assert!(matches!(policy.interval_secs(), Err(RedlimitError::Config(_))));
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_overflowing_interval_rejected() {
        let policy = RateLimitPolicy::new(LimiterType::FixedWindow, 1, u64::MAX / 100);
        assert!(matches!(policy.interval_secs(), Err(RedlimitError::Config(_))));
        assert!(policy.validate().is_err());

        let policy = RateLimitPolicy::new(LimiterType::FixedWindow, 1, 1)
            .with_interval(u64::MAX, IntervalUnit::Days);
        assert!(policy.validate().is_err());

        let policy = RateLimitPolicy::new(LimiterType::FixedWindow, 1, MAX_INTERVAL_SECS);
        assert_eq!(policy.interval_secs().unwrap(), MAX_INTERVAL_SECS);
    }

    #[test]
    fn test_zero_max_attempts_rejected() {
        let policy = RateLimitPolicy::new(LimiterType::FixedWindow, 0, 10);
        assert!(matches!(policy.validate(), Err(RedlimitError::Config(_))));
    }
}
