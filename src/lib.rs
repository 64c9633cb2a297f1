pub mod app;
pub mod clock;
pub mod config;
pub mod context;
pub mod credentials;
pub mod duration;
pub mod error;
pub mod format;
pub mod market_data;
pub mod models;
pub mod rpc;
pub mod services;
pub mod storage;

pub use app::App;
pub use error::{Error, ErrorKind, Result};
