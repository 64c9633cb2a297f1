//! Process-wide cache of provider secrets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::CredentialStore;

struct Slot {
    store: Arc<dyn CredentialStore>,
    /// Held across the backend read, so concurrent misses for one provider
    /// resolve with a single load.
    cached: Mutex<HashMap<String, SecretString>>,
}

struct Inner {
    slots: HashMap<String, Slot>,
    closed: AtomicBool,
}

/// Secrets for every configured provider, loaded lazily and shared by all
/// requests.
///
/// Created once at startup with [`ProviderCredentials::new`] and torn down
/// with [`ProviderCredentials::shutdown`]; lookups after shutdown fail.
#[derive(Clone)]
pub struct ProviderCredentials {
    inner: Arc<Inner>,
}

impl Default for ProviderCredentials {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

impl ProviderCredentials {
    pub fn new(stores: HashMap<String, Arc<dyn CredentialStore>>) -> Self {
        let slots = stores
            .into_iter()
            .map(|(provider, store)| {
                (
                    provider,
                    Slot {
                        store,
                        cached: Mutex::new(HashMap::new()),
                    },
                )
            })
            .collect();
        Self {
            inner: Arc::new(Inner {
                slots,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn has_provider(&self, provider: &str) -> bool {
        self.inner.slots.contains_key(provider)
    }

    /// Secret `key` for `provider`, reading the backend on first use.
    pub async fn get(&self, provider: &str, key: &str) -> Result<SecretString> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(anyhow!("provider credentials have been shut down"));
        }
        let slot = self
            .inner
            .slots
            .get(provider)
            .with_context(|| format!("No credentials configured for provider {provider}"))?;

        let mut cached = slot.cached.lock().await;
        if let Some(secret) = cached.get(key) {
            return Ok(SecretString::from(secret.expose_secret().to_owned()));
        }
        let secret = slot
            .store
            .get(key)
            .await
            .with_context(|| format!("Failed to read {key} for provider {provider}"))?
            .with_context(|| format!("Missing {key} for provider {provider}"))?;
        debug!(provider, key, "provider credential loaded");
        cached.insert(
            key.to_string(),
            SecretString::from(secret.expose_secret().to_owned()),
        );
        Ok(secret)
    }

    /// Drop cached secrets for `provider` so the next lookup re-reads the
    /// backend.
    pub async fn refresh(&self, provider: &str) {
        if let Some(slot) = self.inner.slots.get(provider) {
            slot.cached.lock().await.clear();
            debug!(provider, "provider credentials invalidated");
        }
    }

    /// Forget every cached secret and refuse further lookups.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for slot in self.inner.slots.values() {
            slot.cached.lock().await.clear();
        }
        info!(providers = self.inner.slots.len(), "provider credentials shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;

    fn credentials(store: Arc<MemoryCredentialStore>) -> ProviderCredentials {
        let store: Arc<dyn CredentialStore> = store;
        ProviderCredentials::new(HashMap::from([("alpha_vantage".to_string(), store)]))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lookups_read_backend_once() -> Result<()> {
        let store = Arc::new(MemoryCredentialStore::from_pairs([(
            "api_key".to_string(),
            "secret".to_string(),
        )]));
        let creds = credentials(store.clone());

        let lookups = (0..32).map(|_| {
            let creds = creds.clone();
            tokio::spawn(async move { creds.get("alpha_vantage", "api_key").await })
        });
        for result in futures::future::join_all(lookups).await {
            assert_eq!(result??.expose_secret(), "secret");
        }
        assert_eq!(store.reads(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_refresh_rereads_backend() -> Result<()> {
        let store = Arc::new(MemoryCredentialStore::from_pairs([(
            "api_key".to_string(),
            "old".to_string(),
        )]));
        let creds = credentials(store.clone());
        assert_eq!(creds.get("alpha_vantage", "api_key").await?.expose_secret(), "old");

        store.set("api_key", SecretString::from("new")).await?;
        assert_eq!(creds.get("alpha_vantage", "api_key").await?.expose_secret(), "old");
        creds.refresh("alpha_vantage").await;
        assert_eq!(creds.get("alpha_vantage", "api_key").await?.expose_secret(), "new");
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_provider_and_shutdown() -> Result<()> {
        let store = Arc::new(MemoryCredentialStore::from_pairs([(
            "api_key".to_string(),
            "secret".to_string(),
        )]));
        let creds = credentials(store);
        assert!(creds.get("coingecko", "api_key").await.is_err());

        creds.shutdown().await;
        let err = creds.get("alpha_vantage", "api_key").await.unwrap_err();
        assert!(err.to_string().contains("shut down"));
        Ok(())
    }
}
