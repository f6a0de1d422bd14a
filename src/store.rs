// 🔌 Store boundary - Item, Category, Association and audit stores
//
// The engine consumes these contracts and never redefines them.
// Reference implementations: memory::InMemoryStore, db::SqliteStore.

use crate::entities::{Association, Category, Item, NewCategory};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ============================================================================
// ITEM STORE (read-only)
// ============================================================================

/// Filters supported by `ItemStore::list_items`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemFilter {
    /// Items holding no association at all
    Unclassified,

    /// Brand equals X (case-insensitive)
    Brand(String),

    /// Items associated with category Y
    InCategory(i64),

    /// Explicit id list
    Ids(Vec<i64>),

    All,
}

pub trait ItemStore {
    /// Finite sequence ordered by item id
    fn list_items(&self, filter: &ItemFilter) -> StoreResult<Vec<Item>>;
}

// ============================================================================
// CATEGORY STORE
// ============================================================================

pub trait CategoryStore {
    fn get_category(&self, id: i64) -> StoreResult<Option<Category>>;

    /// `None` = all, `Some(v)` = only categories with visible == v. Ordered by id.
    fn list_categories(&self, visible: Option<bool>) -> StoreResult<Vec<Category>>;

    fn create_category(&self, new: &NewCategory) -> StoreResult<Category>;

    fn set_visibility(&self, id: i64, visible: bool) -> StoreResult<()>;

    fn reparent(&self, id: i64, new_parent_id: Option<i64>) -> StoreResult<()>;

    /// Only legal when the node has no associations and no children;
    /// otherwise `StoreError::Constraint`.
    fn delete(&self, id: i64) -> StoreResult<()>;
}

// ============================================================================
// ASSOCIATION STORE
// ============================================================================

pub trait AssociationStore {
    fn exists(&self, item_id: i64, category_id: i64) -> StoreResult<bool>;

    /// Insert unless the pair exists. Returns whether a row was inserted.
    ///
    /// Implementations may also report a race as `StoreError::UniqueViolation`.
    fn insert_ignore_duplicate(
        &self,
        item_id: i64,
        category_id: i64,
        is_primary: bool,
    ) -> StoreResult<bool>;

    /// Move one item's association from `old_category_id` to `new_category_id`
    fn update_category_id(
        &self,
        old_category_id: i64,
        new_category_id: i64,
        item_id: i64,
    ) -> StoreResult<()>;

    /// Returns whether a row was removed
    fn delete_one(&self, item_id: i64, category_id: i64) -> StoreResult<bool>;

    fn delete_by_category(&self, category_id: i64) -> StoreResult<usize>;

    /// Ordered by item id
    fn list_by_category(&self, category_id: i64) -> StoreResult<Vec<Association>>;

    /// Category of the item's primary association, if any
    fn primary_category(&self, item_id: i64) -> StoreResult<Option<i64>>;

    /// Flag an existing pair as primary. Returns false when the pair is absent.
    fn set_primary(&self, item_id: i64, category_id: i64) -> StoreResult<bool>;

    /// category id → number of distinct items. Categories without items are absent.
    fn count_distinct_items_by_category(&self) -> StoreResult<BTreeMap<i64, usize>>;
}

// ============================================================================
// AUDIT LOG
// ============================================================================

/// Event for audit trail ("Every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }

    /// Event about a category (entity_type = "category")
    pub fn category(event_type: &str, category_id: i64, data: serde_json::Value) -> Self {
        Event::new(event_type, "category", &category_id.to_string(), data, "consolidator")
    }
}

pub trait AuditLog {
    fn record_event(&self, event: &Event) -> StoreResult<()>;

    /// Most recent first
    fn events_for(&self, entity_type: &str, entity_id: &str) -> StoreResult<Vec<Event>>;
}
