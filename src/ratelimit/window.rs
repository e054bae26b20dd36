//! Window counter strategies.

use super::limiter::script_limiter;
use super::policy::LimiterType;

script_limiter! {
    /// Fixed window counter.
    ///
    /// The first admitted request opens a window of `interval_secs`; up to
    /// `max_attempts` requests are admitted until the record expires with the
    /// window. Bursts of up to twice the quota are possible across the edge of
    /// two consecutive windows.
    FixedWindowRateLimiter, LimiterType::FixedWindow
}

script_limiter! {
    /// Sliding window log.
    ///
    /// Each admission is recorded with its timestamp. A request is admitted
    /// while fewer than `max_attempts` admissions fall within the trailing
    /// `interval_secs`, which removes the burst at window edges.
    SlidingWindowRateLimiter, LimiterType::SlidingWindow
}
