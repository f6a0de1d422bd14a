// End-to-end classification and consolidation against both reference stores

use catalog_taxonomy::{
    AssociationStore, AuditLog, BatchOptions, BatchOrchestrator, BatchOutcome, CategoryStore,
    InMemoryStore, Item, ItemSelector, ItemStore, MergeOptions, NewCategory, Rule, RuleRegistry,
    SqliteStore, TaxonomyConsolidator,
};
use std::collections::BTreeSet;

trait FullStore: ItemStore + CategoryStore + AssociationStore + AuditLog {
    fn seed_items(&self, items: Vec<Item>);
}

impl FullStore for InMemoryStore {
    fn seed_items(&self, items: Vec<Item>) {
        self.insert_items(items).unwrap();
    }
}

impl FullStore for SqliteStore {
    fn seed_items(&self, items: Vec<Item>) {
        self.insert_items(&items).unwrap();
    }
}

fn stores() -> Vec<(&'static str, Box<dyn FullStore>)> {
    vec![
        ("memory", Box::new(InMemoryStore::new())),
        ("sqlite", Box::new(SqliteStore::open_in_memory().unwrap())),
    ]
}

fn seed_scenario(store: &dyn FullStore) -> (i64, i64, i64) {
    let root = store
        .create_category(&NewCategory::new("Chromatography", None))
        .unwrap()
        .id;
    let guard = store
        .create_category(&NewCategory::with_slug("Guard Columns", "guard-columns", Some(root)))
        .unwrap()
        .id;
    let c18 = store
        .create_category(&NewCategory::with_slug("C18 Columns", "c18-columns", Some(root)))
        .unwrap()
        .id;
    let vials = store
        .create_category(&NewCategory::with_slug("Vials & Caps", "vials-caps", None))
        .unwrap()
        .id;

    store.seed_items(vec![
        Item::new(1, "Agilent C18 Analytical Column"),
        Item::new(2, "Guard Column Holder"),
        Item::new(3, "Autosampler Vial, 2mL"),
    ]);

    (guard, c18, vials)
}

fn scenario_registry() -> RuleRegistry {
    RuleRegistry::from_rules(
        "scenario",
        vec![
            Rule::new("guard", 100, &["guard"], "guard-columns"),
            Rule::new("c18", 50, &["c18"], "c18-columns"),
            Rule::new("vial", 10, &["vial"], "vials-caps"),
        ],
    )
    .unwrap()
}

fn members(store: &dyn FullStore, category_id: i64) -> BTreeSet<i64> {
    store
        .list_by_category(category_id)
        .unwrap()
        .iter()
        .map(|a| a.item_id)
        .collect()
}

#[test]
fn test_concrete_scenario_on_every_store() {
    for (name, store) in stores() {
        let (guard, c18, vials) = seed_scenario(store.as_ref());

        let report = BatchOrchestrator::new(store.as_ref(), BatchOptions::default())
            .classify_batch(&ItemSelector::Unclassified, &scenario_registry());

        assert_eq!(report.outcome, BatchOutcome::Completed, "{}", name);
        assert_eq!(report.created, 3, "{}", name);
        assert_eq!(members(store.as_ref(), c18), BTreeSet::from([1]), "{}", name);
        assert_eq!(members(store.as_ref(), guard), BTreeSet::from([2]), "{}", name);
        assert_eq!(members(store.as_ref(), vials), BTreeSet::from([3]), "{}", name);
    }
}

#[test]
fn test_rerun_creates_nothing() {
    for (name, store) in stores() {
        seed_scenario(store.as_ref());
        let registry = scenario_registry();
        let orchestrator = BatchOrchestrator::new(store.as_ref(), BatchOptions::default());

        let first = orchestrator.classify_batch(&ItemSelector::All, &registry);
        let counts = store.count_distinct_items_by_category().unwrap();
        let second = orchestrator.classify_batch(&ItemSelector::All, &registry);

        assert_eq!(first.created, 3, "{}", name);
        assert_eq!(second.created, 0, "{}", name);
        assert_eq!(second.already_existed, 3, "{}", name);
        assert_eq!(store.count_distinct_items_by_category().unwrap(), counts, "{}", name);

        // Unclassified selector is empty after the first run
        let third = orchestrator.classify_batch(&ItemSelector::Unclassified, &registry);
        assert_eq!(third.processed, 0, "{}", name);
    }
}

#[test]
fn test_priority_beats_registration_and_store_order() {
    for (name, store) in stores() {
        let (guard, c18, _) = seed_scenario(store.as_ref());

        // Low-priority rule registered first
        let registry = RuleRegistry::from_rules(
            "priority",
            vec![
                Rule::new("r2", 50, &["Column"], "c18-columns"),
                Rule::new("r1", 100, &["Guard"], "guard-columns"),
            ],
        )
        .unwrap();

        BatchOrchestrator::new(store.as_ref(), BatchOptions::default())
            .classify_batch(&ItemSelector::Ids(vec![2]), &registry);

        assert_eq!(members(store.as_ref(), guard), BTreeSet::from([2]), "{}", name);
        assert!(members(store.as_ref(), c18).is_empty(), "{}", name);
    }
}

#[test]
fn test_reclassify_category_members() {
    for (name, store) in stores() {
        let (guard, c18, _) = seed_scenario(store.as_ref());
        let orchestrator = BatchOrchestrator::new(store.as_ref(), BatchOptions::default());
        orchestrator.classify_batch(&ItemSelector::All, &scenario_registry());

        // Re-run only the guard-column members against a broader rule
        let broader = RuleRegistry::from_rules(
            "broader",
            vec![Rule::new("columns", 10, &["column"], "c18-columns")],
        )
        .unwrap();
        let report = orchestrator.classify_batch(&ItemSelector::InCategory(guard), &broader);

        assert_eq!(report.processed, 1, "{}", name);
        assert_eq!(report.created, 1, "{}", name);
        assert_eq!(members(store.as_ref(), c18), BTreeSet::from([1, 2]), "{}", name);
        assert_eq!(store.primary_category(2).unwrap(), Some(guard), "{}", name);
    }
}

#[test]
fn test_merge_relocation_union() {
    for (name, store) in stores() {
        let a = store.create_category(&NewCategory::new("Columns A", None)).unwrap().id;
        let b = store.create_category(&NewCategory::new("Columns B", None)).unwrap().id;
        for item in [10, 11, 12] {
            store.insert_ignore_duplicate(item, a, true).unwrap();
        }
        store.insert_ignore_duplicate(12, b, false).unwrap();

        let consolidator = TaxonomyConsolidator::new(store.as_ref());
        let report = consolidator
            .merge_categories(a, b, MergeOptions::default())
            .unwrap();

        assert_eq!(report.moved + report.dropped, 3, "{}", name);
        assert_eq!(members(store.as_ref(), b), BTreeSet::from([10, 11, 12]), "{}", name);
        assert_eq!(store.list_by_category(b).unwrap().len(), 3, "{}", name);
        assert!(store.get_category(a).unwrap().is_none(), "{}", name);
        assert_eq!(consolidator.count_by_category().unwrap()[&b], 3, "{}", name);

        let events = store.events_for("category", &a.to_string()).unwrap();
        assert_eq!(events.len(), 1, "{}", name);
        assert_eq!(events[0].event_type, "category_merged", "{}", name);
    }
}

#[test]
fn test_merge_keeps_primary_category() {
    for (name, store) in stores() {
        let a = store.create_category(&NewCategory::new("Columns A", None)).unwrap().id;
        let b = store.create_category(&NewCategory::new("Columns B", None)).unwrap().id;
        store.insert_ignore_duplicate(7, a, true).unwrap();
        store.insert_ignore_duplicate(7, b, false).unwrap();

        let report = TaxonomyConsolidator::new(store.as_ref())
            .merge_categories(a, b, MergeOptions::default())
            .unwrap();

        assert_eq!(report.dropped, 1, "{}", name);
        assert_eq!(store.primary_category(7).unwrap(), Some(b), "{}", name);
    }
}

#[test]
fn test_hide_empty_keeps_category_resolvable() {
    for (name, store) in stores() {
        let (_, _, vials) = seed_scenario(store.as_ref());
        let reserved = store
            .create_category(&NewCategory::new("Reserved", Some(vials)))
            .unwrap()
            .id;
        let consolidator = TaxonomyConsolidator::new(store.as_ref());

        let before = consolidator.count_by_category().unwrap()[&reserved];
        let empty: Vec<i64> = consolidator
            .find_empty(&consolidator.count_by_category().unwrap())
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert!(empty.contains(&reserved), "{}", name);

        consolidator.hide_empty(&[reserved]).unwrap();

        let category = store.get_category(reserved).unwrap().unwrap();
        assert!(!category.visible, "{}", name);
        assert_eq!(category.parent_id, Some(vials), "{}", name);
        assert_eq!(consolidator.count_by_category().unwrap()[&reserved], before, "{}", name);
        assert_eq!(store.list_categories(Some(false)).unwrap().len(), 1, "{}", name);
    }
}

#[test]
fn test_file_backed_sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taxonomy.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        seed_scenario(&store);
        BatchOrchestrator::new(&store, BatchOptions::default())
            .classify_batch(&ItemSelector::All, &scenario_registry());
    }

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.count_associations().unwrap(), 3);

    let report = BatchOrchestrator::new(&store, BatchOptions::default())
        .classify_batch(&ItemSelector::All, &scenario_registry());
    assert_eq!(report.created, 0);
}
