//! Credential storage abstraction.
//!
//! Provides a unified interface for retrieving provider secrets from
//! pluggable backends, plus [`ProviderCredentials`], the shared cache the
//! quote providers read through.
//!
//! # Configuration
//!
//! Each provider entry can carry a `credentials` table naming the backend:
//!
//! ```toml
//! backend = "env"
//!
//! [fields]
//! api_key = "ALPHA_VANTAGE_API_KEY"
//! ```

mod config;
mod env;
mod memory;
mod provider;

pub use config::CredentialConfig;
pub use env::EnvCredentialStore;
pub use memory::MemoryCredentialStore;
pub use provider::ProviderCredentials;

use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;

/// A key-value store for credentials.
///
/// The provider defines what keys it needs; the backend configuration maps
/// those keys to backend-specific locations.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Retrieve a credential by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    /// Returns `Err` if there was an error accessing the backend.
    async fn get(&self, key: &str) -> Result<Option<SecretString>>;

    /// Store a credential.
    ///
    /// Returns `Err` if the backend doesn't support writes or if
    /// there was an error storing the credential.
    async fn set(&self, key: &str, value: SecretString) -> Result<()>;

    /// Check if this store supports writes.
    ///
    /// Some backends (like environment variables) are read-only.
    fn supports_write(&self) -> bool {
        true
    }
}
