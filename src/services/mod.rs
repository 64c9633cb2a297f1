//! Services over the entity store and the price cache.

mod assets;
mod pricing;
mod users;

pub use assets::{AssetSelector, AssetService, AssetSpec};
pub use pricing::{AccountValue, PricingService, UserValue, ValuationError, Value};
pub use users::UserService;
