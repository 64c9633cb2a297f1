use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Id;

/// Owner of zero or more accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: Id, created_at: DateTime<Utc>) -> Self {
        Self { id, created_at }
    }
}
