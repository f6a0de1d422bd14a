// 🔗 Association - link between one Item and one Category
//
// (item_id, category_id) is unique. Re-asserting a pair is a no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub item_id: i64,
    pub category_id: i64,

    /// Advisory: the category the item displays by default
    pub is_primary: bool,

    pub created_at: DateTime<Utc>,
}

impl Association {
    pub fn new(item_id: i64, category_id: i64, is_primary: bool) -> Self {
        Association {
            item_id,
            category_id,
            is_primary,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> (i64, i64) {
        (self.item_id, self.category_id)
    }
}

/// Outcome of `AssociationManager::ensure`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnsureOutcome {
    Created,
    AlreadyExisted,
}

impl EnsureOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, EnsureOutcome::Created)
    }
}
