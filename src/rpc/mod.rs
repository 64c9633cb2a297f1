//! Request/response surface over the services.

mod idempotency;
pub mod messages;
mod server;
mod status;

pub use idempotency::IdempotencyCache;
pub use server::QuotebookServer;
pub use status::{Code, Status};
