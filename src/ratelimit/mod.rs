//! Rate limiting strategies and the request decision flow.

mod interceptor;
mod key;
mod limiter;
mod policy;
mod registry;
mod request;
mod token_bucket;
mod window;

pub use interceptor::{FailureMode, RateLimitInterceptor, Verdict};
pub use key::{
    DefaultKeyGenerator, HandlerKeyGenerator, KeyGenerator, KeyGeneratorRegistry,
    HANDLER_KEY_GENERATOR,
};
pub use limiter::{RateLimiter, ScriptLimiter, DEFAULT_KEY_PREFIX};
pub use policy::{IntervalUnit, LimiterType, RateLimitPolicy, DEFAULT_KEY_GENERATOR};
pub use registry::LimiterRegistry;
pub use request::{HandlerMeta, RequestContext, UNKNOWN_CLIENT_IP};
pub use token_bucket::TokenBucketRateLimiter;
pub use window::{FixedWindowRateLimiter, SlidingWindowRateLimiter};
