use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::Id;

/// A price observation for one asset from one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub asset_id: Id,
    pub price: Decimal,
    /// ISO 4217 code, or a synthetic code for crypto quote currencies.
    pub currency: String,
    /// Observation time reported by the provider.
    pub as_of: DateTime<Utc>,
    /// Local wall-clock time the quote arrived.
    pub received_at: DateTime<Utc>,
    pub source: String,
}

/// What a provider returns before the adapter stamps identity and arrival
/// time onto it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderQuote {
    pub price: Decimal,
    pub currency: String,
    pub as_of: DateTime<Utc>,
}

impl ProviderQuote {
    pub fn new(price: Decimal, currency: impl Into<String>, as_of: DateTime<Utc>) -> Self {
        Self {
            price,
            currency: currency.into(),
            as_of,
        }
    }
}
