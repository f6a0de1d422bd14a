// 🔗 Association Manager - idempotent item ↔ category links
//
// ensure() never surfaces a uniqueness violation: a duplicate pair is
// "already existed", whether the store ignored it or raced and raised.

use crate::entities::{Association, EnsureOutcome};
use crate::error::StoreError;
use crate::store::{AssociationStore, StoreResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Result of moving associations from one category to another
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    /// Rows rewritten to the target category
    pub moved: usize,

    /// Rows dropped because the item already had the target
    pub dropped: usize,
}

impl Relocation {
    pub fn total(&self) -> usize {
        self.moved + self.dropped
    }
}

pub struct AssociationManager<'a, S: AssociationStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: AssociationStore + ?Sized> AssociationManager<'a, S> {
    pub fn new(store: &'a S) -> Self {
        AssociationManager { store }
    }

    /// Link item to category. The primary flag of an existing pair is never changed.
    pub fn ensure(
        &self,
        item_id: i64,
        category_id: i64,
        is_primary: bool,
    ) -> StoreResult<EnsureOutcome> {
        match self.store.insert_ignore_duplicate(item_id, category_id, is_primary) {
            Ok(true) => {
                debug!(item_id, category_id, is_primary, "Association created");
                Ok(EnsureOutcome::Created)
            }
            Ok(false) => Ok(EnsureOutcome::AlreadyExisted),
            Err(StoreError::UniqueViolation(_)) => {
                debug!(item_id, category_id, "Duplicate insert resolved as existing");
                Ok(EnsureOutcome::AlreadyExisted)
            }
            Err(e) => Err(e),
        }
    }

    /// Point every association of `from_category_id` at `to_category_id`.
    ///
    /// Items already linked to the target lose their `from` row instead.
    /// Running it again relocates nothing.
    pub fn relocate(&self, from_category_id: i64, to_category_id: i64) -> StoreResult<Relocation> {
        let mut relocation = Relocation::default();
        if from_category_id == to_category_id {
            return Ok(relocation);
        }

        for association in self.store.list_by_category(from_category_id)? {
            let item_id = association.item_id;

            if self.store.exists(item_id, to_category_id)? {
                self.drop_overlap(&association, to_category_id)?;
                relocation.dropped += 1;
                continue;
            }

            match self
                .store
                .update_category_id(from_category_id, to_category_id, item_id)
            {
                Ok(()) => relocation.moved += 1,
                // Target row appeared between the check and the update
                Err(StoreError::UniqueViolation(_)) => {
                    self.drop_overlap(&association, to_category_id)?;
                    relocation.dropped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if relocation.total() > 0 {
            info!(
                from = from_category_id,
                to = to_category_id,
                moved = relocation.moved,
                dropped = relocation.dropped,
                "Relocated associations"
            );
        }

        Ok(relocation)
    }

    /// Remove a `from` row whose item already has the target. A primary
    /// flag on the removed row moves to the target row unless the item
    /// holds another primary.
    fn drop_overlap(&self, association: &Association, to_category_id: i64) -> StoreResult<()> {
        let item_id = association.item_id;
        self.store.delete_one(item_id, association.category_id)?;

        if association.is_primary && self.store.primary_category(item_id)?.is_none() {
            self.store.set_primary(item_id, to_category_id)?;
            debug!(item_id, category_id = to_category_id, "Primary flag carried to merge target");
        }
        Ok(())
    }

    pub fn remove_all_for(&self, category_id: i64) -> StoreResult<usize> {
        let removed = self.store.delete_by_category(category_id)?;
        if removed > 0 {
            info!(category_id, removed, "Removed associations");
        }
        Ok(removed)
    }

    pub fn primary_category(&self, item_id: i64) -> StoreResult<Option<i64>> {
        self.store.primary_category(item_id)
    }
}

// ============================================================================
// TESTS
// ============================================================================
