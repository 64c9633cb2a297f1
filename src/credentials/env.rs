//! Environment-variable credential backend.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use secrecy::SecretString;

use super::CredentialStore;

/// Read-only store resolving keys to environment variables.
pub struct EnvCredentialStore {
    fields: HashMap<String, String>,
    prefix: String,
}

impl EnvCredentialStore {
    pub fn new(fields: HashMap<String, String>) -> Self {
        Self {
            fields,
            prefix: String::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Variable name for a logical key.
    pub fn variable(&self, key: &str) -> String {
        match self.fields.get(key) {
            Some(name) => name.clone(),
            None => format!("{}{}", self.prefix, key).to_uppercase(),
        }
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<SecretString>> {
        match std::env::var(self.variable(key)) {
            Ok(value) if !value.is_empty() => Ok(Some(SecretString::from(value))),
            Ok(_) | Err(std::env::VarError::NotPresent) => Ok(None),
            Err(err) => bail!("Invalid value in {}: {err}", self.variable(key)),
        }
    }

    async fn set(&self, _key: &str, _value: SecretString) -> Result<()> {
        bail!("environment credential store is read-only")
    }

    fn supports_write(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_mapping() {
        let store = EnvCredentialStore::new(HashMap::from([(
            "api_key".to_string(),
            "MY_VENDOR_KEY".to_string(),
        )]))
        .with_prefix("qb_");

        assert_eq!(store.variable("api_key"), "MY_VENDOR_KEY");
        assert_eq!(store.variable("secret"), "QB_SECRET");
    }

    #[tokio::test]
    async fn test_missing_variable_is_none() -> Result<()> {
        let store = EnvCredentialStore::new(HashMap::new()).with_prefix("QUOTEBOOK_TEST_UNSET_");
        assert!(store.get("api_key").await?.is_none());
        assert!(!store.supports_write());
        assert!(store.set("api_key", SecretString::from("x")).await.is_err());
        Ok(())
    }
}
