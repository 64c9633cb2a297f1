//! Credential configuration.
//!
//! Declared inline on a provider entry in the TOML config:
//!
//! ```toml
//! [[providers]]
//! name = "alpha_vantage"
//! type = "alpha_vantage"
//!
//! [providers.credentials]
//! backend = "env"
//!
//! [providers.credentials.fields]
//! api_key = "ALPHA_VANTAGE_API_KEY"
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{CredentialStore, EnvCredentialStore, MemoryCredentialStore};

/// Configuration for a credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CredentialConfig {
    /// Read from environment variables.
    Env {
        /// Mapping from logical key names to variable names. Keys without a
        /// mapping resolve to `{prefix}{KEY}` upper-cased.
        #[serde(default)]
        fields: HashMap<String, String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
    /// Values given directly in the config. Meant for tests and local setups.
    Memory {
        #[serde(default)]
        values: HashMap<String, String>,
    },
}

impl CredentialConfig {
    /// Build a credential store from this configuration.
    pub fn build(&self) -> Arc<dyn CredentialStore> {
        match self {
            CredentialConfig::Env { fields, prefix } => Arc::new(
                EnvCredentialStore::new(fields.clone()).with_prefix(prefix.clone().unwrap_or_default()),
            ),
            CredentialConfig::Memory { values } => Arc::new(MemoryCredentialStore::from_pairs(
                values.iter().map(|(k, v)| (k.clone(), v.clone())),
            )),
        }
    }
}
