// 🧠 In-memory store - reference implementation of every store trait
//
// Same constraints as the SQLite schema: unique slugs, unique
// (item, category) pairs, parent must exist, delete only empty leaves.

use crate::entities::{Association, Category, Item, NewCategory};
use crate::error::StoreError;
use crate::store::{
    AssociationStore, AuditLog, CategoryStore, Event, ItemFilter, ItemStore, StoreResult,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct State {
    items: BTreeMap<i64, Item>,
    categories: BTreeMap<i64, Category>,
    next_category_id: i64,
    associations: BTreeMap<(i64, i64), Association>,
    events: Vec<Event>,
}

/// Thread-safe in-memory store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the external item catalog
    pub fn insert_item(&self, item: Item) -> StoreResult<()> {
        self.write()?.items.insert(item.id, item);
        Ok(())
    }

    pub fn insert_items(&self, items: impl IntoIterator<Item = Item>) -> StoreResult<()> {
        let mut state = self.write()?;
        for item in items {
            state.items.insert(item.id, item);
        }
        Ok(())
    }

    /// Every association, ordered by (item, category)
    pub fn all_associations(&self) -> StoreResult<Vec<Association>> {
        Ok(self.read()?.associations.values().cloned().collect())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }
}

impl State {
    fn category_exists(&self, id: i64) -> bool {
        self.categories.contains_key(&id)
    }

    fn items_in(&self, category_id: i64) -> HashSet<i64> {
        self.associations
            .keys()
            .filter(|(_, c)| *c == category_id)
            .map(|(item, _)| *item)
            .collect()
    }
}

// ============================================================================
// ITEM STORE
// ============================================================================

impl ItemStore for InMemoryStore {
    fn list_items(&self, filter: &ItemFilter) -> StoreResult<Vec<Item>> {
        let state = self.read()?;

        let items = match filter {
            ItemFilter::All => state.items.values().cloned().collect(),
            ItemFilter::Unclassified => {
                let classified: HashSet<i64> =
                    state.associations.keys().map(|(item, _)| *item).collect();
                state
                    .items
                    .values()
                    .filter(|i| !classified.contains(&i.id))
                    .cloned()
                    .collect()
            }
            ItemFilter::Brand(brand) => {
                let brand = brand.to_lowercase();
                state
                    .items
                    .values()
                    .filter(|i| i.brand.as_deref().map(str::to_lowercase) == Some(brand.clone()))
                    .cloned()
                    .collect()
            }
            ItemFilter::InCategory(category_id) => {
                let members = state.items_in(*category_id);
                state
                    .items
                    .values()
                    .filter(|i| members.contains(&i.id))
                    .cloned()
                    .collect()
            }
            ItemFilter::Ids(ids) => {
                let wanted: HashSet<i64> = ids.iter().copied().collect();
                state
                    .items
                    .values()
                    .filter(|i| wanted.contains(&i.id))
                    .cloned()
                    .collect()
            }
        };

        Ok(items)
    }
}

// ============================================================================
// CATEGORY STORE
// ============================================================================

impl CategoryStore for InMemoryStore {
    fn get_category(&self, id: i64) -> StoreResult<Option<Category>> {
        Ok(self.read()?.categories.get(&id).cloned())
    }

    fn list_categories(&self, visible: Option<bool>) -> StoreResult<Vec<Category>> {
        Ok(self
            .read()?
            .categories
            .values()
            .filter(|c| visible.map_or(true, |v| c.visible == v))
            .cloned()
            .collect())
    }

    fn create_category(&self, new: &NewCategory) -> StoreResult<Category> {
        let mut state = self.write()?;

        if state.categories.values().any(|c| c.slug == new.slug) {
            return Err(StoreError::UniqueViolation(format!(
                "category slug '{}' already exists",
                new.slug
            )));
        }
        if let Some(parent_id) = new.parent_id {
            if !state.category_exists(parent_id) {
                return Err(StoreError::Constraint(format!(
                    "parent category {} does not exist",
                    parent_id
                )));
            }
        }

        state.next_category_id += 1;
        let category = Category {
            id: state.next_category_id,
            name: new.name.clone(),
            slug: new.slug.clone(),
            parent_id: new.parent_id,
            visible: new.visible,
            display_order: new.display_order,
        };
        state.categories.insert(category.id, category.clone());

        Ok(category)
    }

    fn set_visibility(&self, id: i64, visible: bool) -> StoreResult<()> {
        let mut state = self.write()?;
        let category = state
            .categories
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("category {}", id)))?;
        category.visible = visible;
        Ok(())
    }

    fn reparent(&self, id: i64, new_parent_id: Option<i64>) -> StoreResult<()> {
        let mut state = self.write()?;

        if !state.category_exists(id) {
            return Err(StoreError::NotFound(format!("category {}", id)));
        }
        if let Some(parent_id) = new_parent_id {
            if !state.category_exists(parent_id) {
                return Err(StoreError::Constraint(format!(
                    "parent category {} does not exist",
                    parent_id
                )));
            }
            // Walk up from the new parent; reaching `id` means a cycle
            let mut current = Some(parent_id);
            while let Some(ancestor) = current {
                if ancestor == id {
                    return Err(StoreError::Constraint(format!(
                        "reparenting {} under {} creates a cycle",
                        id, parent_id
                    )));
                }
                current = state.categories.get(&ancestor).and_then(|c| c.parent_id);
            }
        }

        if let Some(category) = state.categories.get_mut(&id) {
            category.parent_id = new_parent_id;
        }
        Ok(())
    }

    fn delete(&self, id: i64) -> StoreResult<()> {
        let mut state = self.write()?;

        if !state.category_exists(id) {
            return Err(StoreError::NotFound(format!("category {}", id)));
        }
        if state.categories.values().any(|c| c.parent_id == Some(id)) {
            return Err(StoreError::Constraint(format!("category {} has children", id)));
        }
        if state.associations.keys().any(|(_, c)| *c == id) {
            return Err(StoreError::Constraint(format!(
                "category {} still has associations",
                id
            )));
        }

        state.categories.remove(&id);
        Ok(())
    }
}

// ============================================================================
// ASSOCIATION STORE
// ============================================================================

impl AssociationStore for InMemoryStore {
    fn exists(&self, item_id: i64, category_id: i64) -> StoreResult<bool> {
        Ok(self.read()?.associations.contains_key(&(item_id, category_id)))
    }

    fn insert_ignore_duplicate(
        &self,
        item_id: i64,
        category_id: i64,
        is_primary: bool,
    ) -> StoreResult<bool> {
        let mut state = self.write()?;

        if !state.category_exists(category_id) {
            return Err(StoreError::Constraint(format!(
                "category {} does not exist",
                category_id
            )));
        }
        if state.associations.contains_key(&(item_id, category_id)) {
            return Ok(false);
        }

        state.associations.insert(
            (item_id, category_id),
            Association::new(item_id, category_id, is_primary),
        );
        Ok(true)
    }

    fn update_category_id(
        &self,
        old_category_id: i64,
        new_category_id: i64,
        item_id: i64,
    ) -> StoreResult<()> {
        let mut state = self.write()?;

        if !state.category_exists(new_category_id) {
            return Err(StoreError::Constraint(format!(
                "category {} does not exist",
                new_category_id
            )));
        }
        if state.associations.contains_key(&(item_id, new_category_id)) {
            return Err(StoreError::UniqueViolation(format!(
                "item {} already linked to category {}",
                item_id, new_category_id
            )));
        }

        let mut association = state
            .associations
            .remove(&(item_id, old_category_id))
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "association {} → {}",
                    item_id, old_category_id
                ))
            })?;
        association.category_id = new_category_id;
        state.associations.insert(association.key(), association);

        Ok(())
    }

    fn delete_one(&self, item_id: i64, category_id: i64) -> StoreResult<bool> {
        Ok(self
            .write()?
            .associations
            .remove(&(item_id, category_id))
            .is_some())
    }

    fn delete_by_category(&self, category_id: i64) -> StoreResult<usize> {
        let mut state = self.write()?;
        let before = state.associations.len();
        state.associations.retain(|(_, c), _| *c != category_id);
        Ok(before - state.associations.len())
    }

    fn list_by_category(&self, category_id: i64) -> StoreResult<Vec<Association>> {
        Ok(self
            .read()?
            .associations
            .values()
            .filter(|a| a.category_id == category_id)
            .cloned()
            .collect())
    }

    fn primary_category(&self, item_id: i64) -> StoreResult<Option<i64>> {
        Ok(self
            .read()?
            .associations
            .values()
            .find(|a| a.item_id == item_id && a.is_primary)
            .map(|a| a.category_id))
    }

    fn set_primary(&self, item_id: i64, category_id: i64) -> StoreResult<bool> {
        match self.write()?.associations.get_mut(&(item_id, category_id)) {
            Some(association) => {
                association.is_primary = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn count_distinct_items_by_category(&self) -> StoreResult<BTreeMap<i64, usize>> {
        let state = self.read()?;
        let mut items: BTreeMap<i64, HashSet<i64>> = BTreeMap::new();
        for (item_id, category_id) in state.associations.keys() {
            items.entry(*category_id).or_default().insert(*item_id);
        }
        Ok(items.into_iter().map(|(c, set)| (c, set.len())).collect())
    }
}

// ============================================================================
// AUDIT LOG
// ============================================================================

impl AuditLog for InMemoryStore {
    fn record_event(&self, event: &Event) -> StoreResult<()> {
        self.write()?.events.push(event.clone());
        Ok(())
    }

    fn events_for(&self, entity_type: &str, entity_id: &str) -> StoreResult<Vec<Event>> {
        Ok(self
            .read()?
            .events
            .iter()
            .rev()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .cloned()
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================
