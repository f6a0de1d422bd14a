// 🚚 Batch Orchestrator - classify a working set of items
//
// Sequential, one pass per invocation. Per-item failures are counted and
// the run continues until errors exceed the threshold. Callers always get
// a BatchReport, never a bare error.

use crate::associations::AssociationManager;
use crate::entities::{CategorySnapshot, EnsureOutcome, Item};
use crate::error::{EngineError, Result};
use crate::matcher::{DisabledReason, Matcher};
use crate::rules::RuleRegistry;
use crate::store::{AssociationStore, CategoryStore, ItemFilter, ItemStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// ITEM SELECTOR
// ============================================================================

/// Which items a batch works on. Re-invoking re-queries the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemSelector {
    /// Items without any category
    Unclassified,
    Brand(String),
    InCategory(i64),
    Ids(Vec<i64>),
    All,
}

impl ItemSelector {
    pub fn filter(&self) -> ItemFilter {
        match self {
            ItemSelector::Unclassified => ItemFilter::Unclassified,
            ItemSelector::Brand(brand) => ItemFilter::Brand(brand.clone()),
            ItemSelector::InCategory(id) => ItemFilter::InCategory(*id),
            ItemSelector::Ids(ids) => ItemFilter::Ids(ids.clone()),
            ItemSelector::All => ItemFilter::All,
        }
    }
}

/// `unclassified`, `all`, `brand:<name>`, `category:<id>`, `ids:1,2,3`
impl FromStr for ItemSelector {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (kind, value) = match s.split_once(':') {
            Some((kind, value)) => (kind.trim(), Some(value.trim())),
            None => (s.trim(), None),
        };

        match (kind.to_lowercase().as_str(), value) {
            ("unclassified", None) => Ok(ItemSelector::Unclassified),
            ("all", None) => Ok(ItemSelector::All),
            ("brand", Some(brand)) if !brand.is_empty() => Ok(ItemSelector::Brand(brand.to_string())),
            ("category", Some(id)) => id
                .parse()
                .map(ItemSelector::InCategory)
                .map_err(|_| format!("invalid category id: {}", id)),
            ("ids", Some(ids)) => ids
                .split(',')
                .map(|id| id.trim().parse::<i64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(ItemSelector::Ids)
                .map_err(|_| format!("invalid id list: {}", ids)),
            _ => Err(format!(
                "unknown selector '{}' (expected unclassified, all, brand:<name>, category:<id>, ids:<id,..>)",
                s
            )),
        }
    }
}

// ============================================================================
// OPTIONS & STOP SIGNAL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Abort once the error count exceeds this ceiling
    pub error_threshold: usize,

    /// How many error messages the report keeps
    pub max_error_messages: usize,

    /// Log progress every N items (0 = never)
    pub progress_every: usize,

    /// Resolve and count without writing associations
    pub dry_run: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            error_threshold: 50,
            max_error_messages: 10,
            progress_every: 500,
            dry_run: false,
        }
    }
}

/// External stop signal, checked between items
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

// ============================================================================
// BATCH REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    ErrorThreshold,
    Stopped,
    ListingFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOutcome {
    Running,
    Completed,
    Aborted { reason: AbortReason },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: String,
    pub registry_version: String,
    pub rules_fingerprint: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,

    /// Items pulled from the selector and looked at
    pub processed: usize,

    /// Items whose winning rule was applied
    pub matched: usize,

    /// Items no rule matched
    pub skipped: usize,

    /// Items without usable text
    pub malformed: usize,

    pub created: usize,
    pub already_existed: usize,
    pub errors: usize,

    /// First N error messages
    pub error_messages: Vec<String>,

    /// category id → items matched into it this run
    pub per_category: BTreeMap<i64, usize>,

    pub disabled_rules: BTreeMap<String, DisabledReason>,
    pub outcome: BatchOutcome,
}

impl BatchReport {
    fn new(registry: &RuleRegistry, dry_run: bool) -> Self {
        BatchReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            registry_version: registry.version().to_string(),
            rules_fingerprint: registry.fingerprint(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            processed: 0,
            matched: 0,
            skipped: 0,
            malformed: 0,
            created: 0,
            already_existed: 0,
            errors: 0,
            error_messages: Vec::new(),
            per_category: BTreeMap::new(),
            disabled_rules: BTreeMap::new(),
            outcome: BatchOutcome::Running,
        }
    }

    fn record_error(&mut self, message: String, max_messages: usize) {
        self.errors += 1;
        if self.error_messages.len() < max_messages {
            self.error_messages.push(message);
        }
    }

    fn finish(mut self, outcome: BatchOutcome) -> Self {
        self.outcome = outcome;
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, BatchOutcome::Aborted { .. })
    }

    pub fn summary(&self) -> String {
        format!(
            "Batch {}: {} processed, {} matched ({} created, {} existing), {} skipped, {} malformed, {} errors{}",
            self.run_id,
            self.processed,
            self.matched,
            self.created,
            self.already_existed,
            self.skipped,
            self.malformed,
            self.errors,
            match self.outcome {
                BatchOutcome::Aborted { reason } => format!(" | ABORTED ({:?})", reason),
                _ => String::new(),
            }
        )
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

enum ItemOutcome {
    Linked { category_id: i64, ensured: EnsureOutcome },
    WouldLink { category_id: i64 },
    NoMatch,
}

pub struct BatchOrchestrator<'a, S>
where
    S: ItemStore + CategoryStore + AssociationStore + ?Sized,
{
    store: &'a S,
    options: BatchOptions,
    stop: StopHandle,
}

impl<'a, S> BatchOrchestrator<'a, S>
where
    S: ItemStore + CategoryStore + AssociationStore + ?Sized,
{
    pub fn new(store: &'a S, options: BatchOptions) -> Self {
        BatchOrchestrator {
            store,
            options,
            stop: StopHandle::new(),
        }
    }

    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Classify every item the selector yields against the registry
    pub fn classify_batch(&self, selector: &ItemSelector, registry: &RuleRegistry) -> BatchReport {
        let mut report = BatchReport::new(registry, self.options.dry_run);

        // One snapshot per run, shared by every item
        let snapshot = match self.store.list_categories(None) {
            Ok(categories) => CategorySnapshot::new(categories),
            Err(e) => {
                warn!("Failed to load categories: {}", e);
                report.record_error(format!("loading categories: {}", e), self.options.max_error_messages);
                return report.finish(BatchOutcome::Aborted { reason: AbortReason::ListingFailed });
            }
        };

        let matcher = Matcher::new(registry.rules(), &snapshot);
        report.disabled_rules = matcher.disabled().clone();

        let items = match self.store.list_items(&selector.filter()) {
            Ok(items) => items,
            Err(e) => {
                warn!("Failed to list items for {:?}: {}", selector, e);
                report.record_error(format!("listing items: {}", e), self.options.max_error_messages);
                return report.finish(BatchOutcome::Aborted { reason: AbortReason::ListingFailed });
            }
        };

        info!(
            run_id = %report.run_id,
            items = items.len(),
            active_rules = matcher.active_rule_count(),
            disabled_rules = report.disabled_rules.len(),
            dry_run = self.options.dry_run,
            "Starting classification batch"
        );

        let mut primaries: HashSet<i64> = HashSet::new();
        let mut outcome = BatchOutcome::Completed;

        for item in &items {
            if self.stop.is_stopped() {
                warn!(run_id = %report.run_id, processed = report.processed, "Stop requested");
                outcome = BatchOutcome::Aborted { reason: AbortReason::Stopped };
                break;
            }

            report.processed += 1;

            match self.process_item(&matcher, item, &mut primaries) {
                Ok(ItemOutcome::Linked { category_id, ensured }) => {
                    report.matched += 1;
                    *report.per_category.entry(category_id).or_insert(0) += 1;
                    match ensured {
                        EnsureOutcome::Created => report.created += 1,
                        EnsureOutcome::AlreadyExisted => report.already_existed += 1,
                    }
                }
                Ok(ItemOutcome::WouldLink { category_id }) => {
                    report.matched += 1;
                    *report.per_category.entry(category_id).or_insert(0) += 1;
                }
                Ok(ItemOutcome::NoMatch) => report.skipped += 1,
                Err(EngineError::MalformedItem(id)) => {
                    debug!(item_id = id, "Skipping item without usable text");
                    report.malformed += 1;
                }
                Err(e) => {
                    report.record_error(format!("item {}: {}", item.id, e), self.options.max_error_messages);
                    if report.errors > self.options.error_threshold {
                        warn!(
                            run_id = %report.run_id,
                            errors = report.errors,
                            threshold = self.options.error_threshold,
                            "Error threshold exceeded; aborting batch"
                        );
                        outcome = BatchOutcome::Aborted { reason: AbortReason::ErrorThreshold };
                        break;
                    }
                }
            }

            if self.options.progress_every > 0 && report.processed % self.options.progress_every == 0 {
                info!(
                    run_id = %report.run_id,
                    processed = report.processed,
                    total = items.len(),
                    matched = report.matched,
                    errors = report.errors,
                    "Batch progress"
                );
            }
        }

        let report = report.finish(outcome);
        info!("{}", report.summary());
        report
    }

    fn process_item(
        &self,
        matcher: &Matcher<'_>,
        item: &Item,
        primaries: &mut HashSet<i64>,
    ) -> Result<ItemOutcome> {
        let Some(resolution) = matcher.resolve(item)? else {
            return Ok(ItemOutcome::NoMatch);
        };

        if self.options.dry_run {
            return Ok(ItemOutcome::WouldLink {
                category_id: resolution.category_id,
            });
        }

        let manager = AssociationManager::new(self.store);
        let is_primary =
            !primaries.contains(&item.id) && manager.primary_category(item.id)?.is_none();

        let ensured = manager.ensure(item.id, resolution.category_id, is_primary)?;
        primaries.insert(item.id);

        debug!(
            item_id = item.id,
            rule_id = %resolution.rule_id,
            category_id = resolution.category_id,
            ?ensured,
            "Item classified"
        );

        Ok(ItemOutcome::Linked {
            category_id: resolution.category_id,
            ensured,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Association, Category, NewCategory};
    use crate::error::StoreError;
    use crate::memory::InMemoryStore;
    use crate::rules::Rule;
    use crate::store::StoreResult;
    use std::cell::Cell;

    /// Delegates to InMemoryStore; every `fail_every`-th insert fails
    struct FlakyStore {
        inner: InMemoryStore,
        fail_every: usize,
        inserts: Cell<usize>,
    }

    impl ItemStore for FlakyStore {
        fn list_items(&self, filter: &ItemFilter) -> StoreResult<Vec<Item>> {
            self.inner.list_items(filter)
        }
    }

    impl CategoryStore for FlakyStore {
        fn get_category(&self, id: i64) -> StoreResult<Option<Category>> {
            self.inner.get_category(id)
        }
        fn list_categories(&self, visible: Option<bool>) -> StoreResult<Vec<Category>> {
            self.inner.list_categories(visible)
        }
        fn create_category(&self, new: &NewCategory) -> StoreResult<Category> {
            self.inner.create_category(new)
        }
        fn set_visibility(&self, id: i64, visible: bool) -> StoreResult<()> {
            self.inner.set_visibility(id, visible)
        }
        fn reparent(&self, id: i64, new_parent_id: Option<i64>) -> StoreResult<()> {
            self.inner.reparent(id, new_parent_id)
        }
        fn delete(&self, id: i64) -> StoreResult<()> {
            CategoryStore::delete(&self.inner, id)
        }
    }

    impl AssociationStore for FlakyStore {
        fn exists(&self, item_id: i64, category_id: i64) -> StoreResult<bool> {
            self.inner.exists(item_id, category_id)
        }
        fn insert_ignore_duplicate(&self, item_id: i64, category_id: i64, is_primary: bool) -> StoreResult<bool> {
            let call = self.inserts.get() + 1;
            self.inserts.set(call);
            if call % self.fail_every == 0 {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.insert_ignore_duplicate(item_id, category_id, is_primary)
        }
        fn update_category_id(&self, old: i64, new: i64, item_id: i64) -> StoreResult<()> {
            self.inner.update_category_id(old, new, item_id)
        }
        fn delete_one(&self, item_id: i64, category_id: i64) -> StoreResult<bool> {
            self.inner.delete_one(item_id, category_id)
        }
        fn delete_by_category(&self, category_id: i64) -> StoreResult<usize> {
            self.inner.delete_by_category(category_id)
        }
        fn list_by_category(&self, category_id: i64) -> StoreResult<Vec<Association>> {
            self.inner.list_by_category(category_id)
        }
        fn primary_category(&self, item_id: i64) -> StoreResult<Option<i64>> {
            self.inner.primary_category(item_id)
        }
        fn set_primary(&self, item_id: i64, category_id: i64) -> StoreResult<bool> {
            self.inner.set_primary(item_id, category_id)
        }
        fn count_distinct_items_by_category(&self) -> StoreResult<BTreeMap<i64, usize>> {
            self.inner.count_distinct_items_by_category()
        }
    }

    fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .create_category(&NewCategory::with_slug("Guard Columns", "guard-columns", None))
            .unwrap();
        store
            .create_category(&NewCategory::with_slug("C18 Columns", "c18-columns", None))
            .unwrap();
        store
            .create_category(&NewCategory::with_slug("Vials & Caps", "vials-caps", None))
            .unwrap();
        store
            .insert_items(vec![
                Item::new(1, "Agilent C18 Analytical Column"),
                Item::new(2, "Guard Column Holder"),
                Item::new(3, "Autosampler Vial, 2mL"),
            ])
            .unwrap();
        store
    }

    fn scenario_registry() -> RuleRegistry {
        RuleRegistry::from_rules(
            "test",
            vec![
                Rule::new("guard", 100, &["guard"], "guard-columns"),
                Rule::new("c18", 50, &["c18"], "c18-columns"),
                Rule::new("vial", 10, &["vial"], "vials-caps"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_selector_parsing() {
        assert_eq!("unclassified".parse::<ItemSelector>().unwrap(), ItemSelector::Unclassified);
        assert_eq!("ALL".parse::<ItemSelector>().unwrap(), ItemSelector::All);
        assert_eq!(
            "brand:Agilent".parse::<ItemSelector>().unwrap(),
            ItemSelector::Brand("Agilent".to_string())
        );
        assert_eq!("category:7".parse::<ItemSelector>().unwrap(), ItemSelector::InCategory(7));
        assert_eq!("ids:1, 2,3".parse::<ItemSelector>().unwrap(), ItemSelector::Ids(vec![1, 2, 3]));
        assert!("category:x".parse::<ItemSelector>().is_err());
        assert!("brand:".parse::<ItemSelector>().is_err());
        assert!("everything".parse::<ItemSelector>().is_err());
    }

    #[test]
    fn test_concrete_scenario() {
        let store = seeded_store();
        let orchestrator = BatchOrchestrator::new(&store, BatchOptions::default());

        let report = orchestrator.classify_batch(&ItemSelector::Unclassified, &scenario_registry());

        assert_eq!(report.outcome, BatchOutcome::Completed);
        assert_eq!(report.matched, 3);
        assert_eq!(report.created, 3);
        let pairs: Vec<(i64, i64)> = store
            .all_associations()
            .unwrap()
            .iter()
            .map(|a| (a.item_id, a.category_id))
            .collect();
        // Slugs were created in order: guard-columns=1, c18-columns=2, vials-caps=3
        assert_eq!(pairs, vec![(1, 2), (2, 1), (3, 3)]);
        assert!(store.all_associations().unwrap().iter().all(|a| a.is_primary));
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let store = seeded_store();
        let orchestrator = BatchOrchestrator::new(&store, BatchOptions::default());
        let registry = scenario_registry();

        orchestrator.classify_batch(&ItemSelector::All, &registry);
        let before = store.all_associations().unwrap();
        let second = orchestrator.classify_batch(&ItemSelector::All, &registry);

        assert_eq!(second.created, 0);
        assert_eq!(second.already_existed, 3);
        assert_eq!(store.all_associations().unwrap(), before);
    }

    #[test]
    fn test_skipped_and_malformed_counted_separately() {
        let store = seeded_store();
        store
            .insert_items(vec![
                Item::new(4, "Pipette Tips"),
                Item {
                    id: 5,
                    name: None,
                    type_hint: None,
                    brand: None,
                },
            ])
            .unwrap();

        let report = BatchOrchestrator::new(&store, BatchOptions::default())
            .classify_batch(&ItemSelector::All, &scenario_registry());

        assert_eq!(report.processed, 5);
        assert_eq!(report.matched, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.errors, 0);
    }

    #[test]
    fn test_missing_target_rule_is_skipped() {
        let store = seeded_store();
        let registry = RuleRegistry::from_rules(
            "test",
            vec![
                Rule::new("ghost", 500, &["column"], "no-such-category"),
                Rule::new("vial", 10, &["vial"], "vials-caps"),
            ],
        )
        .unwrap();

        let report = BatchOrchestrator::new(&store, BatchOptions::default())
            .classify_batch(&ItemSelector::All, &registry);

        assert_eq!(report.matched, 1);
        assert_eq!(report.skipped, 2);
        assert!(report.disabled_rules.contains_key("ghost"));
        assert_eq!(report.outcome, BatchOutcome::Completed);
    }

    #[test]
    fn test_circuit_breaker() {
        let inner = InMemoryStore::new();
        inner
            .create_category(&NewCategory::with_slug("Vials & Caps", "vials-caps", None))
            .unwrap();
        inner
            .insert_items((1..=20).map(|id| Item::new(id, "Autosampler Vial, 2mL")))
            .unwrap();
        let store = FlakyStore {
            inner,
            fail_every: 2,
            inserts: Cell::new(0),
        };
        let options = BatchOptions {
            error_threshold: 5,
            max_error_messages: 3,
            ..BatchOptions::default()
        };
        let registry =
            RuleRegistry::from_rules("test", vec![Rule::new("vial", 10, &["vial"], "vials-caps")]).unwrap();

        let report = BatchOrchestrator::new(&store, options).classify_batch(&ItemSelector::All, &registry);

        assert_eq!(report.errors, 6);
        assert_eq!(
            report.outcome,
            BatchOutcome::Aborted { reason: AbortReason::ErrorThreshold }
        );
        assert!(report.matched + report.skipped < 20);
        assert_eq!(report.processed, 12);
        assert_eq!(report.error_messages.len(), 3);
        assert!(report.error_messages[0].contains("connection reset"));
    }

    #[test]
    fn test_stop_handle_aborts_between_items() {
        let store = seeded_store();
        let orchestrator = BatchOrchestrator::new(&store, BatchOptions::default());
        orchestrator.stop_handle().stop();

        let report = orchestrator.classify_batch(&ItemSelector::All, &scenario_registry());

        assert_eq!(report.processed, 0);
        assert_eq!(report.outcome, BatchOutcome::Aborted { reason: AbortReason::Stopped });
        assert!(store.all_associations().unwrap().is_empty());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let store = seeded_store();
        let options = BatchOptions {
            dry_run: true,
            ..BatchOptions::default()
        };

        let report = BatchOrchestrator::new(&store, options)
            .classify_batch(&ItemSelector::All, &scenario_registry());

        assert!(report.dry_run);
        assert_eq!(report.matched, 3);
        assert_eq!(report.created, 0);
        assert_eq!(report.per_category.values().sum::<usize>(), 3);
        assert!(store.all_associations().unwrap().is_empty());
    }

    #[test]
    fn test_primary_only_for_first_association() {
        let store = seeded_store();
        let registry = scenario_registry();
        let orchestrator = BatchOrchestrator::new(&store, BatchOptions::default());
        orchestrator.classify_batch(&ItemSelector::All, &registry);

        // A later rule set sends item 2 to a second category
        let retargeted = RuleRegistry::from_rules(
            "test-2",
            vec![Rule::new("holder", 100, &["holder"], "c18-columns")],
        )
        .unwrap();
        let report = orchestrator.classify_batch(&ItemSelector::Ids(vec![2]), &retargeted);

        assert_eq!(report.created, 1);
        assert_eq!(store.primary_category(2).unwrap(), Some(1));
        let c18 = store.list_by_category(2).unwrap();
        let holder = c18.iter().find(|a| a.item_id == 2).unwrap();
        assert!(!holder.is_primary);
    }

    #[test]
    fn test_report_summary() {
        let store = seeded_store();
        let report = BatchOrchestrator::new(&store, BatchOptions::default())
            .classify_batch(&ItemSelector::All, &scenario_registry());

        let summary = report.summary();
        assert!(summary.contains("3 processed"));
        assert!(summary.contains("3 matched (3 created, 0 existing)"));
        assert!(!summary.contains("ABORTED"));
        assert_eq!(report.to_string(), summary);
        assert_eq!(report.registry_version, "test");
        assert!(report.finished_at.is_some());
    }
}
