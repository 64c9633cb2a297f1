use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Id;

/// A container of holdings owned by exactly one user.
///
/// `owner_id` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Id,
    pub owner_id: Id,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: Id, owner_id: Id, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id,
            created_at,
        }
    }
}
