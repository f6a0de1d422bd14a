// Catalog Taxonomy Engine - Core Library
// Rule-driven item classification and category tree consolidation

pub mod error;
pub mod config;
pub mod entities;       // Items, Categories, Associations
pub mod rules;          // Rule Registry
pub mod matcher;        // First-match-wins classification
pub mod store;          // Store boundary traits
pub mod memory;         // In-memory store
pub mod db;             // SQLite store
pub mod associations;   // Association Manager
pub mod consolidation;  // Taxonomy Consolidator
pub mod batch;          // Batch Orchestrator

// Re-export commonly used types
pub use error::{EngineError, Result, StoreError};
pub use config::EngineConfig;
pub use entities::{
    slugify, Association, Category, CategorySnapshot, EnsureOutcome, Item, NewCategory,
};
pub use rules::{pattern_matches, CategoryRef, Rule, RuleRegistry};
pub use matcher::{
    classify, classify_traced, DisabledReason, MatchTrace, Matcher, Resolution, RuleEvaluation,
    RuleOutcome,
};
pub use store::{AssociationStore, AuditLog, CategoryStore, Event, ItemFilter, ItemStore, StoreResult};
pub use memory::InMemoryStore;
pub use db::{setup_database, SqliteStore};
pub use associations::{AssociationManager, Relocation};
pub use consolidation::{
    normalize_name, DuplicateGroup, MergeOptions, MergeReport, TaxonomyConsolidator,
};
pub use batch::{
    AbortReason, BatchOptions, BatchOrchestrator, BatchOutcome, BatchReport, ItemSelector,
    StopHandle,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
