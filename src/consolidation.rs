// 🧹 Taxonomy Consolidator - merge duplicates, hide empty nodes
//
// Each operation is a discrete, named step:
//   merge_categories  active → merged-away (terminal, node removed)
//   hide_empty        active → hidden (presentation only)
//   show              hidden → active (operator decision, never automatic)
//
// Merge order is relocate → reparent children → delete. If the delete
// fails the source is left empty and harmless; re-running finishes it.

use crate::associations::AssociationManager;
use crate::entities::{Category, CategorySnapshot};
use crate::error::{EngineError, Result};
use crate::store::{AssociationStore, AuditLog, CategoryStore, Event};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

// ============================================================================
// MERGE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOptions {
    /// Reparent the source's children under the target instead of rejecting
    pub cascade: bool,
}

impl MergeOptions {
    pub fn cascade() -> Self {
        MergeOptions { cascade: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub source_id: i64,
    pub target_id: i64,

    /// Associations rewritten to the target
    pub moved: usize,

    /// Associations dropped because the item already had the target
    pub dropped: usize,

    pub children_reparented: Vec<i64>,
}

/// Sibling categories whose names normalize to the same key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub parent_id: Option<i64>,
    pub normalized_name: String,

    /// Member with the most items (lowest id on ties); merge target
    pub canonical_id: i64,

    pub duplicate_ids: Vec<i64>,
}

/// "Vials & Caps" and "vial and cap" both become "vial cap"
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && *w != "and")
        .map(|w| {
            if w.len() > 3 && w.ends_with('s') && !w.ends_with("ss") {
                &w[..w.len() - 1]
            } else {
                w
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// CONSOLIDATOR
// ============================================================================

pub struct TaxonomyConsolidator<'a, S>
where
    S: CategoryStore + AssociationStore + AuditLog + ?Sized,
{
    store: &'a S,
}

impl<'a, S> TaxonomyConsolidator<'a, S>
where
    S: CategoryStore + AssociationStore + AuditLog + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        TaxonomyConsolidator { store }
    }

    /// Immutable view of the current taxonomy. Refuses a tree whose
    /// parent links form a cycle.
    pub fn snapshot(&self) -> Result<CategorySnapshot> {
        let snapshot = CategorySnapshot::new(self.store.list_categories(None)?);
        let cycles = snapshot.cycles();
        if !cycles.is_empty() {
            warn!(?cycles, "Category tree is not acyclic");
            return Err(EngineError::CategoryCycle(cycles));
        }
        Ok(snapshot)
    }

    /// Move everything from `source_id` into `target_id`, then delete the source.
    ///
    /// Rejected before any mutation when source == target, either node is
    /// unknown, the source has children without `cascade`, or (with
    /// `cascade`) the target sits below the source.
    pub fn merge_categories(
        &self,
        source_id: i64,
        target_id: i64,
        options: MergeOptions,
    ) -> Result<MergeReport> {
        if source_id == target_id {
            return Err(EngineError::InvalidMerge(format!(
                "cannot merge category {} into itself",
                source_id
            )));
        }

        let snapshot = self.snapshot()?;
        if !snapshot.contains(source_id) {
            return Err(EngineError::CategoryNotFound(source_id));
        }
        if !snapshot.contains(target_id) {
            return Err(EngineError::CategoryNotFound(target_id));
        }

        let children: Vec<i64> = snapshot.children(source_id).iter().map(|c| c.id).collect();
        if !children.is_empty() && !options.cascade {
            return Err(EngineError::InvalidMerge(format!(
                "category {} has {} children; merge with cascade to reparent them",
                source_id,
                children.len()
            )));
        }
        if snapshot.is_ancestor(source_id, target_id) {
            return Err(EngineError::InvalidMerge(format!(
                "target {} is a descendant of source {}",
                target_id, source_id
            )));
        }

        let relocation = AssociationManager::new(self.store).relocate(source_id, target_id)?;

        for child_id in &children {
            self.store.reparent(*child_id, Some(target_id))?;
            self.audit(Event::category(
                "category_reparented",
                *child_id,
                serde_json::json!({ "from_parent": source_id, "to_parent": target_id }),
            ));
        }

        self.store.delete(source_id)?;

        let report = MergeReport {
            source_id,
            target_id,
            moved: relocation.moved,
            dropped: relocation.dropped,
            children_reparented: children,
        };

        self.audit(Event::category(
            "category_merged",
            source_id,
            serde_json::json!({
                "target_id": target_id,
                "moved": report.moved,
                "dropped": report.dropped,
                "children_reparented": report.children_reparented,
            }),
        ));
        info!(
            source = source_id,
            target = target_id,
            moved = report.moved,
            dropped = report.dropped,
            children = report.children_reparented.len(),
            "Merged category"
        );

        Ok(report)
    }

    /// Set visible = false. Associations and children are untouched.
    /// Returns how many nodes changed state.
    pub fn hide_empty(&self, category_ids: &[i64]) -> Result<usize> {
        self.set_visibility(category_ids, false, "category_hidden")
    }

    /// Reverse `hide_empty`
    pub fn show(&self, category_ids: &[i64]) -> Result<usize> {
        self.set_visibility(category_ids, true, "category_shown")
    }

    /// category id → distinct item count, with zero for categories without items
    pub fn count_by_category(&self) -> Result<BTreeMap<i64, usize>> {
        let mut counts: BTreeMap<i64, usize> = self
            .store
            .list_categories(None)?
            .into_iter()
            .map(|c| (c.id, 0))
            .collect();
        for (category_id, count) in self.store.count_distinct_items_by_category()? {
            counts.insert(category_id, count);
        }
        Ok(counts)
    }

    /// Visible leaves with no items: the candidates for `hide_empty`
    pub fn find_empty(&self, counts: &BTreeMap<i64, usize>) -> Result<Vec<Category>> {
        let snapshot = self.snapshot()?;
        Ok(snapshot
            .all()
            .into_iter()
            .filter(|c| c.visible)
            .filter(|c| counts.get(&c.id).copied().unwrap_or(0) == 0)
            .filter(|c| !snapshot.has_children(c.id))
            .cloned()
            .collect())
    }

    /// Siblings whose names normalize equal
    pub fn find_duplicate_groups(&self) -> Result<Vec<DuplicateGroup>> {
        let snapshot = self.snapshot()?;
        let counts = self.count_by_category()?;

        let mut groups: BTreeMap<(Option<i64>, String), Vec<i64>> = BTreeMap::new();
        for category in snapshot.all() {
            groups
                .entry((category.parent_id, normalize_name(&category.name)))
                .or_default()
                .push(category.id);
        }

        Ok(groups
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|((parent_id, normalized_name), ids)| {
                let canonical_id = pick_canonical(&ids, &counts);
                DuplicateGroup {
                    parent_id,
                    normalized_name,
                    canonical_id,
                    duplicate_ids: ids.into_iter().filter(|id| *id != canonical_id).collect(),
                }
            })
            .collect())
    }

    /// Merge every duplicate of the group into its canonical member
    pub fn merge_duplicate_group(
        &self,
        group: &DuplicateGroup,
        options: MergeOptions,
    ) -> Result<Vec<MergeReport>> {
        group
            .duplicate_ids
            .iter()
            .map(|id| self.merge_categories(*id, group.canonical_id, options))
            .collect()
    }

    fn set_visibility(&self, category_ids: &[i64], visible: bool, event_type: &str) -> Result<usize> {
        // Unknown ids reject the whole call before anything changes
        let snapshot = self.snapshot()?;
        let mut pending = Vec::with_capacity(category_ids.len());
        for id in category_ids {
            let category = snapshot.get(*id).ok_or(EngineError::CategoryNotFound(*id))?;
            if category.visible != visible && !pending.contains(id) {
                pending.push(*id);
            }
        }

        for id in &pending {
            self.store.set_visibility(*id, visible)?;
            self.audit(Event::category(event_type, *id, serde_json::json!({ "visible": visible })));
        }

        if !pending.is_empty() {
            info!(changed = pending.len(), visible, "Updated category visibility");
        }
        Ok(pending.len())
    }

    /// Audit failures never undo a committed mutation
    fn audit(&self, event: Event) {
        if let Err(e) = self.store.record_event(&event) {
            warn!(event_type = %event.event_type, entity_id = %event.entity_id, "Failed to record audit event: {}", e);
        }
    }
}

fn pick_canonical(ids: &[i64], counts: &BTreeMap<i64, usize>) -> i64 {
    let by_count: HashMap<i64, usize> = ids
        .iter()
        .map(|id| (*id, counts.get(id).copied().unwrap_or(0)))
        .collect();

    let mut sorted = ids.to_vec();
    sorted.sort_by(|a, b| by_count[b].cmp(&by_count[a]).then(a.cmp(b)));
    sorted[0]
}

// ============================================================================
// TESTS
// ============================================================================
