use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Id, Tag};
use crate::error::{Error, Result};

static SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z0-9][A-Z0-9._\-/:]{0,31}$").expect("symbol pattern is valid")
});

/// What kind of instrument an asset is. Drives provider routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Fiat,
    Equity,
    Crypto,
    Other,
}

impl AssetKind {
    pub const ALL: [AssetKind; 4] = [Self::Fiat, Self::Equity, Self::Crypto, Self::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fiat => "fiat",
            Self::Equity => "equity",
            Self::Crypto => "crypto",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fiat" => Ok(Self::Fiat),
            "equity" => Ok(Self::Equity),
            "crypto" => Ok(Self::Crypto),
            "other" => Ok(Self::Other),
            other => Err(Error::invalid_argument(format!("unknown asset kind: {other}"))),
        }
    }
}

/// A priceable instrument identified by a unique, upper-cased symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: Id,
    pub symbol: String,
    pub kind: AssetKind,
    pub created_at: DateTime<Utc>,
}

impl Asset {
    /// Build an asset, normalizing and validating the symbol.
    pub fn new(id: Id, symbol: &str, kind: AssetKind, created_at: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            id,
            symbol: normalize_symbol(symbol)?,
            kind,
            created_at,
        })
    }
}

/// Asset with its tag set, sorted by tag name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedAsset {
    pub asset: Asset,
    pub tags: Vec<Tag>,
}

impl TaggedAsset {
    pub fn tag_names(&self) -> Vec<&str> {
        self.tags.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Trim and upper-case a symbol; reject anything that doesn't look like a
/// ticker.
pub fn normalize_symbol(symbol: &str) -> Result<String> {
    let symbol = symbol.trim().to_uppercase();
    if SYMBOL_RE.is_match(&symbol) {
        Ok(symbol)
    } else {
        Err(Error::invalid_argument(format!("invalid symbol: {symbol:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_normalization() {
        assert_eq!(normalize_symbol(" btc ").unwrap(), "BTC");
        assert_eq!(normalize_symbol("brk.b").unwrap(), "BRK.B");
        assert_eq!(normalize_symbol("eur/usd").unwrap(), "EUR/USD");
    }

    #[test]
    fn test_symbol_rejects_garbage() {
        assert!(normalize_symbol("").is_err());
        assert!(normalize_symbol("with space").is_err());
        assert!(normalize_symbol(".LEADINGDOT").is_err());
        assert!(normalize_symbol(&"A".repeat(33)).is_err());
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(serde_json::to_string(&AssetKind::Crypto).unwrap(), "\"crypto\"");
        assert_eq!("Equity".parse::<AssetKind>().unwrap(), AssetKind::Equity);
        assert!("bond".parse::<AssetKind>().is_err());
    }
}
