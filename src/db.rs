// 🗄️ SQLite store - durable implementation of every store trait
//
// Uniqueness of (item_id, category_id) lives in the schema. `ensure`
// relies on INSERT OR IGNORE rather than select-then-insert.

use crate::entities::{Association, Category, Item, NewCategory};
use crate::error::StoreError;
use crate::store::{
    AssociationStore, AuditLog, CategoryStore, Event, ItemFilter, ItemStore, StoreResult,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Items (mirror of the external catalog, read-only to the engine)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY,
            name TEXT,
            type_hint TEXT,
            brand TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Categories (rooted tree, slug unique)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            slug TEXT UNIQUE NOT NULL,
            parent_id INTEGER REFERENCES categories(id),
            visible INTEGER NOT NULL DEFAULT 1,
            display_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    // ==========================================================================
    // Associations (item ↔ category, pair unique)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS associations (
            item_id INTEGER NOT NULL,
            category_id INTEGER NOT NULL REFERENCES categories(id),
            is_primary INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            UNIQUE(item_id, category_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail for consolidation)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_associations_category ON associations(category_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_categories_parent ON categories(parent_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_items_brand ON items(lower(brand))",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        name: row.get(1)?,
        type_hint: row.get(2)?,
        brand: row.get(3)?,
    })
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        parent_id: row.get(3)?,
        visible: row.get(4)?,
        display_order: row.get(5)?,
    })
}

fn association_from_row(row: &Row<'_>) -> rusqlite::Result<Association> {
    let created_at: String = row.get(3)?;
    Ok(Association {
        item_id: row.get(0)?,
        category_id: row.get(1)?,
        is_primary: row.get(2)?,
        created_at: parse_timestamp(3, &created_at)?,
    })
}

const ITEM_COLUMNS: &str = "id, name, type_hint, brand";
const CATEGORY_COLUMNS: &str = "id, name, slug, parent_id, visible, display_order";

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a database file and ensure the schema
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open database: {:?}", path.as_ref()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn).context("Failed to initialize schema")?;
        Ok(SqliteStore { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Mirror catalog items into the local items table (insert or replace)
    pub fn insert_items(&self, items: &[Item]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO items (id, name, type_hint, brand) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for item in items {
                written += stmt.execute(params![item.id, item.name, item.type_hint, item.brand])?;
            }
        }

        tx.commit()?;
        info!("Mirrored {} items", written);
        Ok(written)
    }

    pub fn count_associations(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM associations", [], |row| row.get(0))?;
        Ok(count)
    }

    fn query_items(&self, sql: &str, params: impl rusqlite::Params) -> StoreResult<Vec<Item>> {
        let mut stmt = self.conn.prepare(sql)?;
        let items = stmt
            .query_map(params, item_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }
}

// ============================================================================
// ITEM STORE
// ============================================================================

impl ItemStore for SqliteStore {
    fn list_items(&self, filter: &ItemFilter) -> StoreResult<Vec<Item>> {
        match filter {
            ItemFilter::All => self.query_items(
                &format!("SELECT {} FROM items ORDER BY id", ITEM_COLUMNS),
                [],
            ),
            ItemFilter::Unclassified => self.query_items(
                &format!(
                    "SELECT {} FROM items
                     WHERE NOT EXISTS (SELECT 1 FROM associations a WHERE a.item_id = items.id)
                     ORDER BY id",
                    ITEM_COLUMNS
                ),
                [],
            ),
            ItemFilter::Brand(brand) => self.query_items(
                &format!(
                    "SELECT {} FROM items WHERE lower(brand) = lower(?1) ORDER BY id",
                    ITEM_COLUMNS
                ),
                params![brand],
            ),
            ItemFilter::InCategory(category_id) => self.query_items(
                &format!(
                    "SELECT {} FROM items
                     WHERE id IN (SELECT item_id FROM associations WHERE category_id = ?1)
                     ORDER BY id",
                    ITEM_COLUMNS
                ),
                params![category_id],
            ),
            ItemFilter::Ids(ids) => {
                let ids_json = serde_json::to_string(ids)
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
                self.query_items(
                    &format!(
                        "SELECT {} FROM items
                         WHERE id IN (SELECT value FROM json_each(?1))
                         ORDER BY id",
                        ITEM_COLUMNS
                    ),
                    params![ids_json],
                )
            }
        }
    }
}

// ============================================================================
// CATEGORY STORE
// ============================================================================

impl CategoryStore for SqliteStore {
    fn get_category(&self, id: i64) -> StoreResult<Option<Category>> {
        let category = self
            .conn
            .query_row(
                &format!("SELECT {} FROM categories WHERE id = ?1", CATEGORY_COLUMNS),
                params![id],
                category_from_row,
            )
            .optional()?;
        Ok(category)
    }

    fn list_categories(&self, visible: Option<bool>) -> StoreResult<Vec<Category>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM categories WHERE (?1 IS NULL OR visible = ?1) ORDER BY id",
            CATEGORY_COLUMNS
        ))?;
        let categories = stmt
            .query_map(params![visible], category_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(categories)
    }

    fn create_category(&self, new: &NewCategory) -> StoreResult<Category> {
        self.conn.execute(
            "INSERT INTO categories (name, slug, parent_id, visible, display_order)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![new.name, new.slug, new.parent_id, new.visible, new.display_order],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(category_id = id, slug = %new.slug, "Created category");

        Ok(Category {
            id,
            name: new.name.clone(),
            slug: new.slug.clone(),
            parent_id: new.parent_id,
            visible: new.visible,
            display_order: new.display_order,
        })
    }

    fn set_visibility(&self, id: i64, visible: bool) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE categories SET visible = ?2 WHERE id = ?1",
            params![id, visible],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("category {}", id)));
        }
        Ok(())
    }

    fn reparent(&self, id: i64, new_parent_id: Option<i64>) -> StoreResult<()> {
        let tx = self.conn.unchecked_transaction()?;

        if let Some(parent_id) = new_parent_id {
            // Walk up from the new parent; reaching `id` means a cycle
            let mut current = Some(parent_id);
            while let Some(ancestor) = current {
                if ancestor == id {
                    return Err(StoreError::Constraint(format!(
                        "reparenting {} under {} creates a cycle",
                        id, parent_id
                    )));
                }
                current = tx
                    .query_row(
                        "SELECT parent_id FROM categories WHERE id = ?1",
                        params![ancestor],
                        |row| row.get::<_, Option<i64>>(0),
                    )
                    .optional()?
                    .flatten();
            }
        }

        let changed = tx.execute(
            "UPDATE categories SET parent_id = ?2 WHERE id = ?1",
            params![id, new_parent_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("category {}", id)));
        }

        tx.commit()?;
        Ok(())
    }

    fn delete(&self, id: i64) -> StoreResult<()> {
        let tx = self.conn.unchecked_transaction()?;

        let (children, associations): (i64, i64) = tx.query_row(
            "SELECT
                (SELECT COUNT(*) FROM categories WHERE parent_id = ?1),
                (SELECT COUNT(*) FROM associations WHERE category_id = ?1)",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        if children > 0 {
            return Err(StoreError::Constraint(format!("category {} has children", id)));
        }
        if associations > 0 {
            return Err(StoreError::Constraint(format!(
                "category {} still has associations",
                id
            )));
        }

        let deleted = tx.execute("DELETE FROM categories WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound(format!("category {}", id)));
        }

        tx.commit()?;
        Ok(())
    }
}

// ============================================================================
// ASSOCIATION STORE
// ============================================================================

impl AssociationStore for SqliteStore {
    fn exists(&self, item_id: i64, category_id: i64) -> StoreResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM associations WHERE item_id = ?1 AND category_id = ?2",
                params![item_id, category_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert_ignore_duplicate(
        &self,
        item_id: i64,
        category_id: i64,
        is_primary: bool,
    ) -> StoreResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO associations (item_id, category_id, is_primary, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![item_id, category_id, is_primary, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    fn update_category_id(
        &self,
        old_category_id: i64,
        new_category_id: i64,
        item_id: i64,
    ) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE associations SET category_id = ?2 WHERE item_id = ?3 AND category_id = ?1",
            params![old_category_id, new_category_id, item_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!(
                "association {} → {}",
                item_id, old_category_id
            )));
        }
        Ok(())
    }

    fn delete_one(&self, item_id: i64, category_id: i64) -> StoreResult<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM associations WHERE item_id = ?1 AND category_id = ?2",
            params![item_id, category_id],
        )?;
        Ok(deleted > 0)
    }

    fn delete_by_category(&self, category_id: i64) -> StoreResult<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM associations WHERE category_id = ?1",
            params![category_id],
        )?;
        Ok(deleted)
    }

    fn list_by_category(&self, category_id: i64) -> StoreResult<Vec<Association>> {
        let mut stmt = self.conn.prepare(
            "SELECT item_id, category_id, is_primary, created_at
             FROM associations WHERE category_id = ?1 ORDER BY item_id",
        )?;
        let associations = stmt
            .query_map(params![category_id], association_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(associations)
    }

    fn primary_category(&self, item_id: i64) -> StoreResult<Option<i64>> {
        let category_id = self
            .conn
            .query_row(
                "SELECT category_id FROM associations
                 WHERE item_id = ?1 AND is_primary = 1
                 ORDER BY created_at LIMIT 1",
                params![item_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(category_id)
    }

    fn set_primary(&self, item_id: i64, category_id: i64) -> StoreResult<bool> {
        let changed = self.conn.execute(
            "UPDATE associations SET is_primary = 1 WHERE item_id = ?1 AND category_id = ?2",
            params![item_id, category_id],
        )?;
        Ok(changed > 0)
    }

    fn count_distinct_items_by_category(&self) -> StoreResult<BTreeMap<i64, usize>> {
        let mut stmt = self.conn.prepare(
            "SELECT category_id, COUNT(DISTINCT item_id) FROM associations GROUP BY category_id",
        )?;
        let counts = stmt
            .query_map([], |row| {
                let category_id: i64 = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((category_id, count as usize))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
        Ok(counts)
    }
}

// ============================================================================
// AUDIT LOG
// ============================================================================

impl AuditLog for SqliteStore {
    /// Insert event into audit trail
    fn record_event(&self, event: &Event) -> StoreResult<()> {
        let data_json = serde_json::to_string(&event.data)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        self.conn.execute(
            "INSERT INTO events (
                event_id, timestamp, event_type, entity_type, entity_id, data, actor
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.event_id,
                event.timestamp.to_rfc3339(),
                event.event_type,
                event.entity_type,
                event.entity_id,
                data_json,
                event.actor,
            ],
        )?;

        Ok(())
    }

    /// Get events for a specific entity
    fn events_for(&self, entity_type: &str, entity_id: &str) -> StoreResult<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
             FROM events
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY id DESC",
        )?;

        let events = stmt
            .query_map(params![entity_type, entity_id], |row| {
                let timestamp_str: String = row.get(1)?;
                let data_json: String = row.get(5)?;

                Ok(Event {
                    event_id: row.get(0)?,
                    timestamp: parse_timestamp(1, &timestamp_str)?,
                    event_type: row.get(2)?,
                    entity_type: row.get(3)?,
                    entity_id: row.get(4)?,
                    data: serde_json::from_str(&data_json).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            5,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?,
                    actor: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(events)
    }
}

// ============================================================================
// TESTS
// ============================================================================
