//! Configuration management for redlimit.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::error::{RedlimitError, Result};
use crate::ratelimit::{
    FailureMode, HandlerMeta, KeyGeneratorRegistry, LimiterRegistry, LimiterType,
    RateLimitInterceptor, RateLimitPolicy, DEFAULT_KEY_PREFIX,
};
use crate::store::{CounterStore, MemoryStore, RedisStore};

/// Prefix of environment variables overriding file settings.
///
/// Nested keys are separated by `__`, e.g. `REDLIMIT__STORE__URL`.
pub const ENV_PREFIX: &str = "REDLIMIT";

/// Main configuration for redlimit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedlimitConfig {
    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Behaviour when the counter store is unavailable
    #[serde(default)]
    pub failure_mode: FailureMode,

    /// Declared rate limit policies
    #[serde(default)]
    pub policies: PolicyTable,
}

/// Which store holds the counter records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis server
    #[default]
    Redis,
    /// Process-local memory, quotas are not shared between instances
    Memory,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store backend
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix of every counter record key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

/// Policies declared per handler and per controller.
///
/// Handlers are named `Controller::method`; a handler without its own
/// policy inherits the policy of its controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyTable {
    /// Method-level policies keyed by handler name
    #[serde(default)]
    pub handlers: HashMap<String, RateLimitPolicy>,

    /// Class-level policies keyed by controller name
    #[serde(default)]
    pub controllers: HashMap<String, RateLimitPolicy>,
}

impl PolicyTable {
    /// Handler metadata carrying the policies that apply to `handler`.
    pub fn handler_meta(&self, handler: &str) -> HandlerMeta {
        let controller = handler
            .split_once("::")
            .map(|(controller, _)| controller)
            .unwrap_or(handler);

        HandlerMeta {
            name: handler.to_string(),
            method_policy: self.handlers.get(handler).cloned(),
            class_policy: self.controllers.get(controller).cloned(),
        }
    }

    /// Every declared policy with the handler or controller it belongs to.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RateLimitPolicy)> {
        self.handlers
            .iter()
            .chain(self.controllers.iter())
            .map(|(name, policy)| (name.as_str(), policy))
    }

    /// Limiter types used by at least one policy.
    pub fn limiter_types(&self) -> HashSet<LimiterType> {
        self.iter().map(|(_, policy)| policy.limiter_type).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty() && self.controllers.is_empty()
    }
}

impl RedlimitConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RedlimitError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from an optional YAML file overlaid with
    /// `REDLIMIT__*` environment variables.
    ///
    /// The file is parsed as written, so handler and controller names keep
    /// their case. The environment can override the scalar settings only:
    /// `REDLIMIT__STORE__BACKEND`, `REDLIMIT__STORE__URL`,
    /// `REDLIMIT__STORE__KEY_PREFIX` and `REDLIMIT__FAILURE_MODE`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        let env = ::config::Config::builder()
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|e| RedlimitError::Config(format!("Failed to load configuration: {}", e)))?;
        config.apply_env(&env)?;
        Ok(config)
    }

    fn apply_env(&mut self, env: &::config::Config) -> Result<()> {
        if let Some(backend) = env_override(env, "store.backend")? {
            self.store.backend = backend;
        }
        if let Some(url) = env_override(env, "store.url")? {
            self.store.url = url;
        }
        if let Some(key_prefix) = env_override(env, "store.key_prefix")? {
            self.store.key_prefix = key_prefix;
        }
        if let Some(failure_mode) = env_override(env, "failure_mode")? {
            self.failure_mode = failure_mode;
        }
        Ok(())
    }

    /// Check every declared policy can be enforced.
    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Redis && self.store.url.is_empty() {
            return Err(RedlimitError::Config("store.url must not be empty".to_string()));
        }
        for (name, policy) in self.policies.iter() {
            policy.validate().map_err(|e| in_policy(name, e))?;
        }
        Ok(())
    }

    /// Open the configured counter store.
    pub async fn connect_store(&self, clock: Arc<dyn Clock>) -> Result<Arc<dyn CounterStore>> {
        let store: Arc<dyn CounterStore> = match self.store.backend {
            StoreBackend::Redis => Arc::new(RedisStore::connect(&self.store.url).await?),
            StoreBackend::Memory => {
                info!("Using in-memory counter store, quotas are local to this process");
                Arc::new(MemoryStore::with_clock(clock))
            }
        };
        Ok(store)
    }

    /// Validate the configuration and assemble an interceptor over the
    /// configured store.
    ///
    /// Every key generator and limiter type named by a policy is resolved
    /// here, so misconfiguration fails at startup rather than per request.
    pub async fn build_interceptor(
        &self,
        clock: Arc<dyn Clock>,
        key_generators: KeyGeneratorRegistry,
    ) -> Result<RateLimitInterceptor> {
        self.validate()?;
        for (name, policy) in self.policies.iter() {
            key_generators
                .get(&policy.key_generate)
                .map_err(|e| in_policy(name, e))?;
        }

        let store = self.connect_store(clock.clone()).await?;
        let limiters = LimiterRegistry::with_store(store, clock, &self.store.key_prefix);
        limiters.ensure_supports(self.policies.limiter_types())?;

        Ok(
            RateLimitInterceptor::new(Arc::new(limiters), Arc::new(key_generators))
                .with_failure_mode(self.failure_mode),
        )
    }
}

/// Read one environment override, `None` when it is not set.
fn env_override<T: DeserializeOwned>(env: &::config::Config, key: &str) -> Result<Option<T>> {
    match env.get::<T>(key) {
        Ok(value) => Ok(Some(value)),
        Err(::config::ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(RedlimitError::Config(format!(
            "invalid {}__{} override: {}",
            ENV_PREFIX,
            key.replace('.', "__").to_ascii_uppercase(),
            e
        ))),
    }
}

/// Name the policy a configuration error was found in.
fn in_policy(name: &str, err: RedlimitError) -> RedlimitError {
    match err {
        RedlimitError::Config(msg) => RedlimitError::Config(format!("policy for {}: {}", name, msg)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::{IntervalUnit, RequestContext, Verdict};
    use std::io::Write;

    const SAMPLE: &str = r#"
store:
  backend: memory
  key_prefix: "shop:"
failure_mode: fail_open
policies:
  handlers:
    "orders::create":
      limiter_type: token_bucket
      max_attempts: 5
      interval: 5
      ip: true
  controllers:
    "orders":
      limiter_type: fixed_window
      max_attempts: 100
      interval: 1
      time_unit: minutes
"#;

    #[test]
    fn test_defaults() {
        let config = RedlimitConfig::default();
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.url, "redis://127.0.0.1:6379");
        assert_eq!(config.store.key_prefix, "rate_limiter:");
        assert_eq!(config.failure_mode, FailureMode::FailClosed);
        assert!(config.policies.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let config = RedlimitConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.key_prefix, "shop:");
        assert_eq!(config.failure_mode, FailureMode::FailOpen);

        let create = &config.policies.handlers["orders::create"];
        assert_eq!(create.limiter_type, LimiterType::TokenBucket);
        assert!(create.ip);

        let orders = &config.policies.controllers["orders"];
        assert_eq!(orders.time_unit, IntervalUnit::Minutes);
        assert_eq!(orders.interval_secs().unwrap(), 60);

        let types = config.policies.limiter_types();
        assert_eq!(types.len(), 2);
        assert!(types.contains(&LimiterType::FixedWindow));
    }

    #[test]
    fn test_handler_meta_resolution() {
        let config = RedlimitConfig::from_yaml(SAMPLE).unwrap();

        let create = config.policies.handler_meta("orders::create");
        assert_eq!(
            create.effective_policy().map(|p| p.limiter_type),
            Some(LimiterType::TokenBucket)
        );

        let list = config.policies.handler_meta("orders::list");
        assert!(list.method_policy.is_none());
        assert_eq!(
            list.effective_policy().map(|p| p.limiter_type),
            Some(LimiterType::FixedWindow)
        );

        let health = config.policies.handler_meta("health::check");
        assert!(health.effective_policy().is_none());
    }

    #[test]
    fn test_validate_rejects_bad_policy() {
        let yaml = r#"
policies:
  handlers:
    "orders::create":
      max_attempts: 0
      interval: 5
"#;
        let config = RedlimitConfig::from_yaml(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("orders::create"));
    }

    #[tokio::test]
    async fn test_build_interceptor_rejects_overflowing_interval() {
        let yaml = r#"
store:
  backend: memory
failure_mode: fail_open
policies:
  handlers:
    "orders::create":
      max_attempts: 1
      interval: 184467440737095516
"#;
        let config = RedlimitConfig::from_yaml(yaml).unwrap();
        let result = config
            .build_interceptor(Arc::new(ManualClock::new(0)), KeyGeneratorRegistry::new())
            .await;
        assert!(matches!(result, Err(RedlimitError::Config(ref msg)) if msg.contains("orders::create")));
    }

    #[test]
    fn test_unknown_limiter_type_rejected_at_parse() {
        let yaml = r#"
policies:
  handlers:
    "orders::create":
      limiter_type: leaky_bucket
      max_attempts: 1
      interval: 5
"#;
        assert!(matches!(
            RedlimitConfig::from_yaml(yaml),
            Err(RedlimitError::Config(_))
        ));
    }

    #[test]
    fn test_load_file_with_env_override() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        std::env::set_var("REDLIMIT__STORE__KEY_PREFIX", "env:");
        let config = RedlimitConfig::load(Some(file.path()));
        std::env::remove_var("REDLIMIT__STORE__KEY_PREFIX");

        let config = config.unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.key_prefix, "env:");
        assert_eq!(config.failure_mode, FailureMode::FailOpen);
        assert_eq!(config.policies.controllers["orders"].max_attempts, 100);
    }

    #[test]
    fn test_load_keeps_handler_name_case() {
        let yaml = r#"
store:
  backend: memory
policies:
  handlers:
    "OrderController::create":
      limiter_type: fixed_window
      max_attempts: 1
      interval: 60
  controllers:
    "OrderController":
      max_attempts: 10
      interval: 60
"#;
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = RedlimitConfig::load(Some(file.path())).unwrap();
        assert!(config.policies.handlers.contains_key("OrderController::create"));

        let create = config.policies.handler_meta("OrderController::create");
        assert_eq!(
            create.effective_policy().map(|p| p.limiter_type),
            Some(LimiterType::FixedWindow)
        );
        let list = config.policies.handler_meta("OrderController::list");
        assert_eq!(
            list.effective_policy().map(|p| p.limiter_type),
            Some(LimiterType::SlidingWindow)
        );
    }

    #[test]
    fn test_from_file_missing_is_io_error() {
        let result = RedlimitConfig::from_file("/nonexistent/redlimit.yaml");
        assert!(matches!(result, Err(RedlimitError::Io(_))));
    }

    #[tokio::test]
    async fn test_build_interceptor_over_memory_store() {
        let config = RedlimitConfig::from_yaml(SAMPLE).unwrap();
        let interceptor = config
            .build_interceptor(Arc::new(ManualClock::new(0)), KeyGeneratorRegistry::new())
            .await
            .unwrap();
        assert_eq!(interceptor.failure_mode(), FailureMode::FailOpen);

        let request = RequestContext::new("GET", "/orders")
            .with_handler(config.policies.handler_meta("orders::list"));
        assert_eq!(
            interceptor.pre_handle(&request).await.unwrap(),
            Verdict::Allowed {
                key: "/orders".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_build_interceptor_rejects_unknown_key_generator() {
        let yaml = r#"
store:
  backend: memory
policies:
  controllers:
    "orders":
      key_generate: tenant
      max_attempts: 1
      interval: 5
"#;
        let config = RedlimitConfig::from_yaml(yaml).unwrap();
        let result = config
            .build_interceptor(Arc::new(ManualClock::new(0)), KeyGeneratorRegistry::new())
            .await;
        assert!(matches!(result, Err(RedlimitError::Config(_))));
    }
}
