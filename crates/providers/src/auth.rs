//! Process-wide credential cache.
//!
//! API keys are configured as environment-variable indirections
//! (`api_key_env`). The cache resolves each variable once, serves
//! concurrent readers lock-free-ish, and serializes refreshes per
//! provider so a burst of 401s triggers one re-read, not many.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use coda_domain::error::{Error, ProviderErrorKind, Result};

pub struct CredentialCache {
    /// provider id → resolved key.
    keys: RwLock<HashMap<String, String>>,
    /// provider id → refresh lock.
    refresh: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialCache {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            refresh: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the key for a provider, reading `env_var` on a miss.
    pub async fn resolve(&self, provider_id: &str, env_var: &str) -> Result<String> {
        if let Some(key) = self.keys.read().get(provider_id) {
            return Ok(key.clone());
        }

        let lock = {
            let mut refresh = self.refresh.lock();
            refresh
                .entry(provider_id.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        // Another task may have refreshed while we waited.
        if let Some(key) = self.keys.read().get(provider_id) {
            return Ok(key.clone());
        }

        let key = std::env::var(env_var).ok().filter(|v| !v.is_empty()).ok_or_else(|| {
            Error::provider(
                provider_id,
                ProviderErrorKind::Auth,
                format!("environment variable '{env_var}' not set or empty"),
            )
        })?;
        self.keys
            .write()
            .insert(provider_id.to_owned(), key.clone());
        Ok(key)
    }

    /// Drop a provider's cached key (e.g. after a 401). The next resolve
    /// re-reads the environment.
    pub fn invalidate(&self, provider_id: &str) {
        self.keys.write().remove(provider_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_and_caches_from_env() {
        std::env::set_var("CODA_TEST_KEY_A", "secret-a");
        let cache = CredentialCache::new();
        let key = cache.resolve("a", "CODA_TEST_KEY_A").await.unwrap();
        assert_eq!(key, "secret-a");

        // Cached value survives the env var disappearing.
        std::env::remove_var("CODA_TEST_KEY_A");
        let key = cache.resolve("a", "CODA_TEST_KEY_A").await.unwrap();
        assert_eq!(key, "secret-a");

        // Invalidate forces a re-read, which now fails.
        cache.invalidate("a");
        assert!(cache.resolve("a", "CODA_TEST_KEY_A").await.is_err());
    }

    #[tokio::test]
    async fn missing_env_var_is_an_auth_error() {
        let cache = CredentialCache::new();
        let err = cache.resolve("b", "CODA_TEST_KEY_MISSING").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Provider {
                kind: ProviderErrorKind::Auth,
                ..
            }
        ));
    }
}
