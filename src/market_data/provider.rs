use thiserror::Error;

use super::ProviderQuote;
use crate::models::Asset;

/// How the adapter should treat a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Terminal for this provider; retrying won't help.
    Never,
    /// Transient; retry with exponential backoff.
    WithBackoff,
}

/// Failure reported by a single quote provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider explicitly has no data for this asset.
    #[error("{provider} does not cover {symbol}")]
    NotCovered { provider: String, symbol: String },

    /// Timeouts, connection failures, 5xx and rate limiting.
    #[error("{provider} transient failure: {message}")]
    Transient { provider: String, message: String },

    /// Permanent provider-side failure (bad credentials, malformed payload).
    #[error("{provider} rejected request: {message}")]
    Rejected { provider: String, message: String },
}

impl ProviderError {
    pub fn not_covered(provider: &str, symbol: &str) -> Self {
        Self::NotCovered {
            provider: provider.to_string(),
            symbol: symbol.to_string(),
        }
    }

    pub fn transient(provider: &str, message: impl Into<String>) -> Self {
        Self::Transient {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn rejected(provider: &str, message: impl Into<String>) -> Self {
        Self::Rejected {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// Classify an HTTP status returned by a provider.
    pub fn from_status(provider: &str, status: u16) -> Self {
        match status {
            404 => Self::rejected(provider, "endpoint not found (HTTP 404)"),
            408 | 429 | 500..=599 => Self::transient(provider, format!("HTTP {status}")),
            _ => Self::rejected(provider, format!("HTTP {status}")),
        }
    }

    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Transient { .. } => RetryClass::WithBackoff,
            Self::NotCovered { .. } | Self::Rejected { .. } => RetryClass::Never,
        }
    }

    pub fn is_not_covered(&self) -> bool {
        matches!(self, Self::NotCovered { .. })
    }
}

#[cfg(feature = "http-providers")]
impl ProviderError {
    /// Classify a transport error from the HTTP client.
    pub fn from_reqwest(provider: &str, err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(provider, status.as_u16());
        }
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::transient(provider, err.to_string())
        } else {
            Self::rejected(provider, err.to_string())
        }
    }
}

/// A source of current quotes.
#[async_trait::async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn fetch_quote(&self, asset: &Asset) -> Result<ProviderQuote, ProviderError>;

    fn name(&self) -> &str;
}
