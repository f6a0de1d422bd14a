// ⚠️ Error types - store boundary errors and engine errors
//
// StoreError is what a store implementation may raise.
// EngineError is what the engine surfaces to its callers.

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by Item/Category/Association stores
#[derive(Error, Debug)]
pub enum StoreError {
    /// Unique constraint hit (e.g. duplicate item/category pair).
    /// Never surfaced by the Association Manager; normalized to "already existed".
    #[error("Uniqueness violation: {0}")]
    UniqueViolation(String),

    /// Connectivity loss, lock poisoning, I/O failure
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Referenced row does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other constraint (foreign key, delete of non-empty category)
    #[error("Constraint violated: {0}")]
    Constraint(String),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                match e.extended_code {
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        StoreError::UniqueViolation(err.to_string())
                    }
                    _ => StoreError::Constraint(err.to_string()),
                }
            }
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(err.to_string()),
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

/// Engine error taxonomy
#[derive(Error, Debug)]
pub enum EngineError {
    /// Store failure that is not a uniqueness violation
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A rule points at a category id or slug that is not in the snapshot
    #[error("Rule '{rule_id}' targets missing category {target}")]
    MissingTargetCategory { rule_id: String, target: String },

    /// Item has no usable text field
    #[error("Item {0} has no usable text")]
    MalformedItem(i64),

    /// Merge rejected before any mutation
    #[error("Invalid merge: {0}")]
    InvalidMerge(String),

    #[error("Category not found: {0}")]
    CategoryNotFound(i64),

    /// Stored parent links loop back on themselves
    #[error("Category tree has a parent cycle through {0:?}")]
    CategoryCycle(Vec<i64>),

    /// Rule registry or configuration problem
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl EngineError {
    /// True for failures that count against the batch circuit breaker
    pub fn is_store_failure(&self) -> bool {
        matches!(self, EngineError::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_unique_violation_mapping() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (a INTEGER, b INTEGER, UNIQUE(a, b))", [])
            .unwrap();
        conn.execute("INSERT INTO t (a, b) VALUES (1, 2)", []).unwrap();

        let err = conn
            .execute("INSERT INTO t (a, b) VALUES (1, 2)", [])
            .unwrap_err();

        assert!(StoreError::from(err).is_unique_violation());
    }

    #[test]
    fn test_foreign_key_is_not_unique_violation() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn.execute("CREATE TABLE p (id INTEGER PRIMARY KEY)", []).unwrap();
        conn.execute(
            "CREATE TABLE c (id INTEGER PRIMARY KEY, p_id INTEGER NOT NULL REFERENCES p(id))",
            [],
        )
        .unwrap();

        let err = conn
            .execute("INSERT INTO c (p_id) VALUES (42)", [])
            .unwrap_err();

        let store_err = StoreError::from(err);
        assert!(!store_err.is_unique_violation());
        assert!(matches!(store_err, StoreError::Constraint(_)));
    }

    #[test]
    fn test_store_failure_classification() {
        let err = EngineError::from(StoreError::Unavailable("down".to_string()));
        assert!(err.is_store_failure());
        assert!(!EngineError::MalformedItem(7).is_store_failure());
        assert_eq!(EngineError::MalformedItem(7).to_string(), "Item 7 has no usable text");
    }
}
