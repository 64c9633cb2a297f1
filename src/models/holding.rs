use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Id;
use crate::error::{Error, Result};

/// Minimum decimal scale quantities are stored with.
pub const QUANTITY_SCALE: u32 = 8;

/// A non-negative amount of an asset, kept at scale >= 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Quantity(Decimal);

impl Quantity {
    pub fn new(value: Decimal) -> Result<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(Error::invalid_argument(format!(
                "quantity must not be negative: {value}"
            )));
        }
        let mut value = value.abs();
        if value.scale() < QUANTITY_SCALE {
            value.rescale(QUANTITY_SCALE);
            // rescale caps the scale when the integer part is too wide.
            if value.scale() < QUANTITY_SCALE {
                return Err(Error::invalid_argument(format!(
                    "quantity too large to keep {QUANTITY_SCALE} decimal places: {value}"
                )));
            }
        }
        Ok(Self(value))
    }

    pub fn zero() -> Self {
        let mut value = Decimal::ZERO;
        value.rescale(QUANTITY_SCALE);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl TryFrom<Decimal> for Quantity {
    type Error = Error;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An account's claim on a quantity of one asset.
///
/// At most one holding exists per (account, asset) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub id: Id,
    pub account_id: Id,
    pub asset_id: Id,
    pub quantity: Quantity,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quantity_rescaled_to_eight_places() {
        let q = Quantity::new(dec!(0.5)).unwrap();
        assert_eq!(q.value().scale(), 8);
        assert_eq!(q.to_string(), "0.50000000");
    }

    #[test]
    fn test_quantity_keeps_higher_scale() {
        let q = Quantity::new(dec!(0.0000000001)).unwrap();
        assert_eq!(q.value().scale(), 10);
    }

    #[test]
    fn test_negative_quantity_rejected() {
        let err = Quantity::new(dec!(-1)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_quantity_too_wide_for_eight_places_rejected() {
        let err = Quantity::new(Decimal::MAX).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);

        let err = Quantity::new(Decimal::from_i128_with_scale(10i128.pow(21), 0)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_negative_zero_is_zero() {
        let q = Quantity::new(-Decimal::ZERO).unwrap();
        assert!(q.is_zero());
    }

    #[test]
    fn test_deserialize_rejects_negative() {
        assert!(serde_json::from_str::<Quantity>("\"-3\"").is_err());
        let q: Quantity = serde_json::from_str("\"3\"").unwrap();
        assert_eq!(q.value(), dec!(3));
    }
}
