mod account;
mod asset;
mod holding;
mod id;
mod id_generator;
mod tag;
mod user;

pub use account::Account;
pub use asset::{normalize_symbol, Asset, AssetKind, TaggedAsset};
pub use holding::{Holding, Quantity, QUANTITY_SCALE};
pub use id::Id;
pub use id_generator::{FixedIdGenerator, IdGenerator, UuidIdGenerator};
pub use tag::{normalize_tag_name, Tag};
pub use user::User;
