//! Named policies, defined at startup and looked up at call-sites.
//!
//! Entries are type-erased so one registry can hold policies for different
//! result/failure types; [`PolicyRegistry::lookup`] checks the type on the
//! way out.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::outcome::Classifier;
use crate::policy::Policy;

struct Entry {
    kind: &'static str,
    policy: Arc<dyn Any + Send + Sync>,
}

/// Thread-safe in-memory policy registry. Clones share the same entries.
#[derive(Clone, Default)]
pub struct PolicyRegistry {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl PolicyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `policy` under `key`, replacing any previous entry.
    /// Returns `true` if an entry was replaced.
    pub fn register<T, E>(&self, key: impl Into<String>, policy: impl Into<Policy<T, E>>) -> bool
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let key = key.into();
        let policy: Policy<T, E> = policy.into();
        let entry = Entry {
            kind: policy.kind(),
            policy: Arc::new(policy),
        };
        debug!(key = %key, kind = entry.kind, "Registering policy");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry)
            .is_some()
    }

    /// Look up the policy registered under `key`.
    pub fn lookup<T, E>(&self, key: &str) -> Result<Arc<Policy<T, E>>, RegistryError>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let erased = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|entry| entry.policy.clone())
            .ok_or_else(|| RegistryError::NotFound {
                key: key.to_string(),
            })?;
        erased
            .downcast::<Policy<T, E>>()
            .map_err(|_| RegistryError::TypeMismatch {
                key: key.to_string(),
            })
    }

    /// Returns `true` if something is registered under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// The registered policy, or a pass-through [`Policy::NoOp`] when `key`
    /// is absent, so a missing entry degrades to running the operation
    /// directly. An entry registered for other types is still an error.
    pub fn get_or_noop<T, E>(&self, key: &str) -> Result<Arc<Policy<T, E>>, RegistryError>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        match self.lookup(key) {
            Err(RegistryError::NotFound { .. }) => {
                debug!(key, "No policy registered, using no-op");
                Ok(Arc::new(Policy::NoOp))
            }
            found => found,
        }
    }

    /// Remove the entry under `key`. Returns `true` if one existed.
    pub fn remove(&self, key: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.entries().into_iter().map(|(key, _)| key).collect()
    }

    /// Registered keys with the kind of their outermost policy, sorted by key.
    pub fn entries(&self) -> Vec<(String, &'static str)> {
        let mut out: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, e)| (k.clone(), e.kind))
            .collect();
        out.sort();
        out
    }

    /// Total number of registered policies.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build and register every policy in `config`, all sharing `classifier`.
    /// Nothing is registered if any entry is invalid.
    pub fn load_config<T, E>(
        &self,
        config: &RegistryConfig,
        classifier: &Classifier<T, E>,
    ) -> Result<usize, RegistryError>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let mut built = Vec::with_capacity(config.policies.len());
        for (key, spec) in &config.policies {
            let policy = spec.build(classifier).map_err(|source| RegistryError::InvalidPolicy {
                key: key.clone(),
                source,
            })?;
            built.push((key.clone(), policy));
        }
        let count = built.len();
        for (key, policy) in built {
            self.register(key, policy);
        }
        Ok(count)
    }

    /// Load policies from a JSON document.
    /// Expected format: `{ "policies": { "<key>": { "kind": "retry", ... }, ... } }`
    pub fn load_json<T, E>(
        &self,
        json: &str,
        classifier: &Classifier<T, E>,
    ) -> Result<usize, RegistryError>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if !value.is_object() {
            return Err(RegistryError::Deserialization(serde::de::Error::custom(
                "policy config must be a JSON object",
            )));
        }
        let config: RegistryConfig = serde_json::from_value(value)?;
        self.load_config(&config, classifier)
    }
}

impl std::fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("entries", &self.entries())
            .finish()
    }
}
