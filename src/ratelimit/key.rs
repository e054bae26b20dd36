//! Quota key generation.
//!
//! A policy names the generator that turns a request into its quota key.
//! The interceptor appends `:IP<client ip>` afterwards when the policy is
//! scoped per client.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::policy::DEFAULT_KEY_GENERATOR;
use super::request::RequestContext;
use crate::error::{RedlimitError, Result};

/// Name under which [`HandlerKeyGenerator`] is registered by default.
pub const HANDLER_KEY_GENERATOR: &str = "handler";

/// Builds the quota key for a request.
pub trait KeyGenerator: Send + Sync {
    /// Append the key for `request` to `key`.
    fn generate_key(&self, request: &RequestContext, key: &mut String);
}

impl<F> KeyGenerator for F
where
    F: Fn(&RequestContext, &mut String) + Send + Sync,
{
    fn generate_key(&self, request: &RequestContext, key: &mut String) {
        self(request, key)
    }
}

/// Keys requests by path, so every caller of a path shares one quota.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyGenerator;

impl KeyGenerator for DefaultKeyGenerator {
    fn generate_key(&self, request: &RequestContext, key: &mut String) {
        key.push_str(&request.path);
    }
}

/// Keys requests by matched handler and method.
///
/// Requests to `/orders/1` and `/orders/2` routed to the same handler share
/// one quota. Falls back to the path for requests without a handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerKeyGenerator;

impl KeyGenerator for HandlerKeyGenerator {
    fn generate_key(&self, request: &RequestContext, key: &mut String) {
        match &request.handler {
            Some(handler) => {
                key.push_str(&handler.name);
                key.push(':');
                key.push_str(&request.method);
            }
            None => key.push_str(&request.path),
        }
    }
}

/// Key generators by the name policies refer to them with.
#[derive(Clone)]
pub struct KeyGeneratorRegistry {
    generators: HashMap<String, Arc<dyn KeyGenerator>>,
}

impl KeyGeneratorRegistry {
    /// A registry holding the `default` and `handler` generators.
    pub fn new() -> Self {
        Self::empty()
            .with_generator(DEFAULT_KEY_GENERATOR, DefaultKeyGenerator)
            .with_generator(HANDLER_KEY_GENERATOR, HandlerKeyGenerator)
    }

    /// A registry with no generators at all.
    pub fn empty() -> Self {
        Self {
            generators: HashMap::new(),
        }
    }

    /// Register `generator` under `name`, replacing any previous one.
    pub fn with_generator<G>(mut self, name: impl Into<String>, generator: G) -> Self
    where
        G: KeyGenerator + 'static,
    {
        self.generators.insert(name.into(), Arc::new(generator));
        self
    }

    /// The generator registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn KeyGenerator>> {
        self.generators.get(name).cloned().ok_or_else(|| {
            RedlimitError::Config(format!("no key generator registered as '{}'", name))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.generators.contains_key(name)
    }
}

impl Default for KeyGeneratorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KeyGeneratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.generators.keys().collect();
        names.sort();
        f.debug_struct("KeyGeneratorRegistry")
            .field("generators", &names)
            .finish()
    }
}
