use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::CredentialStore;

/// In-process credential store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    values: Mutex<HashMap<String, SecretString>>,
    reads: AtomicUsize,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (k, SecretString::from(v)))
            .collect();
        Self {
            values: Mutex::new(values),
            reads: AtomicUsize::new(0),
        }
    }

    /// Number of `get` calls served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<SecretString>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let values = self.values.lock().expect("credential store lock poisoned");
        Ok(values
            .get(key)
            .map(|v| SecretString::from(v.expose_secret().to_owned())))
    }

    async fn set(&self, key: &str, value: SecretString) -> Result<()> {
        self.values
            .lock()
            .expect("credential store lock poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }
}
