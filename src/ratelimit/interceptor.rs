//! Rate limit decision interceptor.
//!
//! Runs before a request reaches its handler. Requests to handlers without
//! a declared policy pass straight through; everything else is checked
//! against the shared store and either admitted or rejected with
//! [`RedlimitError::QuotaExceeded`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, trace, warn};

use super::key::KeyGeneratorRegistry;
use super::policy::RateLimitPolicy;
use super::registry::LimiterRegistry;
use super::request::{HandlerMeta, RequestContext};
use crate::error::{RedlimitError, Result};
use crate::store::StoreError;

/// What to do with a request when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Reject the request with [`RedlimitError::StoreUnavailable`]
    #[default]
    FailClosed,
    /// Let the request through unthrottled
    FailOpen,
}

/// Outcome of a request that may proceed to its handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// No policy applies to the request
    Unprotected,
    /// The request was counted against `key` and is within quota
    Allowed { key: String },
    /// The store was unavailable and the interceptor fails open
    FailedOpen { key: String },
}

impl Verdict {
    /// The quota key the request was checked against, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Verdict::Unprotected => None,
            Verdict::Allowed { key } | Verdict::FailedOpen { key } => Some(key.as_str()),
        }
    }
}

/// Turns declared policies into admit or reject decisions.
#[derive(Debug)]
pub struct RateLimitInterceptor {
    limiters: Arc<LimiterRegistry>,
    key_generators: Arc<KeyGeneratorRegistry>,
    failure_mode: FailureMode,
}

impl RateLimitInterceptor {
    pub fn new(limiters: Arc<LimiterRegistry>, key_generators: Arc<KeyGeneratorRegistry>) -> Self {
        Self {
            limiters,
            key_generators,
            failure_mode: FailureMode::default(),
        }
    }

    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    pub fn limiters(&self) -> &LimiterRegistry {
        &self.limiters
    }

    /// Decide whether `request` may proceed to its handler.
    ///
    /// # Errors
    ///
    /// - [`RedlimitError::QuotaExceeded`] when the quota is used up.
    /// - [`RedlimitError::Config`] when the policy names an unknown key
    ///   generator or limiter type, or cannot be enforced. This holds in
    ///   both failure modes.
    /// - [`RedlimitError::StoreUnavailable`] when the store fails and the
    ///   interceptor fails closed.
    #[instrument(
        skip(self, request),
        fields(
            method = %request.method,
            path = %request.path,
            handler = request.handler.as_ref().map(|h| h.name.as_str()).unwrap_or("")
        )
    )]
    pub async fn pre_handle(&self, request: &RequestContext) -> Result<Verdict> {
        let Some(policy) = request
            .handler
            .as_ref()
            .and_then(HandlerMeta::effective_policy)
        else {
            trace!("No rate limit policy declared");
            return Ok(Verdict::Unprotected);
        };

        policy.validate()?;
        let key = self.build_key(request, policy)?;
        let limiter = self.limiters.get_by_limiter_type(policy.limiter_type)?;
        let interval_secs = policy.interval_secs()?;

        match limiter
            .try_acquire(&key, policy.max_attempts, interval_secs)
            .await
        {
            Ok(true) => Ok(Verdict::Allowed { key }),
            Ok(false) => {
                debug!(
                    key = %key,
                    limiter_type = %policy.limiter_type,
                    max_attempts = policy.max_attempts,
                    interval_secs,
                    "Rejecting request over quota"
                );
                Err(RedlimitError::QuotaExceeded { key })
            }
            Err(StoreError::InvalidArgument(msg)) => {
                error!(key = %key, error = %msg, "Policy cannot be enforced");
                Err(RedlimitError::Config(msg))
            }
            Err(err) => match self.failure_mode {
                FailureMode::FailClosed => {
                    error!(key = %key, error = %err, "Counter store unavailable, rejecting request");
                    Err(RedlimitError::StoreUnavailable(err))
                }
                FailureMode::FailOpen => {
                    warn!(key = %key, error = %err, "Counter store unavailable, admitting request");
                    Ok(Verdict::FailedOpen { key })
                }
            },
        }
    }

    /// Build the quota key for `request` under `policy`.
    ///
    /// Format: `<generated key>` or `<generated key>:IP<client ip>`.
    pub fn build_key(&self, request: &RequestContext, policy: &RateLimitPolicy) -> Result<String> {
        let generator = self.key_generators.get(&policy.key_generate)?;

        let mut key = String::new();
        generator.generate_key(request, &mut key);
        if policy.ip {
            key.push_str(":IP");
            key.push_str(&request.client_ip());
        }
        Ok(key)
    }
}
