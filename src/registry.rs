//! Provider registry.
//!
//! Explicitly constructed and handed to the [`Verifier`](crate::Verifier)
//! rather than living in process-global state, so tests get a fresh registry
//! per case. Registration happens once at startup; lookups afterwards take
//! only the read lock.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

use crate::error::{AuthError, Result};
use crate::provider::Provider;

/// Concurrency-safe mapping from provider name to provider.
#[derive(Default)]
pub struct Registry {
    providers: RwLock<HashMap<String, Arc<Provider>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert providers, keyed by name. Idempotent: re-registering a name
    /// overwrites the prior entry. Concurrent registrations serialize on the
    /// write lock.
    pub fn register(&self, providers: impl IntoIterator<Item = Provider>) {
        // Every mutation is a single insert, so the map stays consistent
        // even if a writer panicked; recover a poisoned lock.
        let mut map = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for provider in providers {
            info!(provider = %provider.name(), "registered identity provider");
            map.insert(provider.name().to_string(), Arc::new(provider));
        }
    }

    /// Resolve a provider by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<Provider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| AuthError::InvalidProvider {
                name: name.to_string(),
            })
    }

    /// Names of all registered providers, for startup logging.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn provider(name: &str) -> Provider {
        // Shape is irrelevant here; the registry only looks at names.
        Provider::custom(
            name,
            "https://idp.example",
            vec!["aud".into()],
            crate::keys::KeyCache::new(
                "https://idp.example/keys",
                crate::keys::KeyFormat::JwkSet,
                Duration::from_secs(60),
            ),
            Default::default(),
        )
    }

    #[test]
    fn test_resolve_unknown_provider() {
        let registry = Registry::new();
        let err = registry.resolve("nope").unwrap_err();
        assert!(matches!(err, AuthError::InvalidProvider { name } if name == "nope"));
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = Registry::new();
        registry.register([provider("google"), provider("apple")]);

        assert!(registry.resolve("google").is_ok());
        assert!(registry.resolve("apple").is_ok());
        assert_eq!(registry.provider_names().len(), 2);
    }

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let registry = Registry::new();
        registry.register([provider("google")]);

        let poisoner = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = registry.providers.write().unwrap();
            panic!("poison the registry lock");
        }));
        assert!(poisoner.is_err());

        assert!(registry.resolve("google").is_ok());
        registry.register([provider("apple")]);
        assert_eq!(registry.provider_names().len(), 2);
    }

    #[test]
    fn test_reregistration_overwrites() {
        let registry = Registry::new();
        registry.register([provider("google")]);
        registry.register([provider("google")]);
        assert_eq!(registry.provider_names().len(), 1);
    }
}
