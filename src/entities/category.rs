// 🏷️ Category Entity - nodes of the rooted taxonomy tree
//
// "Category name is a VALUE (can change), slug and id are IDENTITY"
//
// Problem solved:
// - Hierarchical categories: "Chromatography" → "HPLC Columns" → "Guard Columns"
// - One immutable snapshot per run instead of lookup tables rebuilt per script
// - Parent/child queries (children, path, ancestors) without touching the store

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// CATEGORY ENTITY
// ============================================================================

/// Category - one node in the taxonomy
///
/// Identity: id (store-assigned) and slug (unique)
/// Values: name, parent_id, visible, display_order
/// Hierarchy: parent_id creates the tree, None = root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,

    /// Display name (e.g., "Guard Columns")
    pub name: String,

    /// Unique slug (e.g., "guard-columns")
    pub slug: String,

    /// Parent category id, None for roots
    pub parent_id: Option<i64>,

    /// Presentation flag. Hidden nodes keep their associations and children.
    pub visible: bool,

    pub display_order: i32,
}

impl Category {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Payload for creating a category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCategory {
    pub name: String,
    pub slug: String,
    pub parent_id: Option<i64>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub display_order: i32,
}

fn default_visible() -> bool {
    true
}

impl NewCategory {
    /// Visible category with a slug derived from the name
    pub fn new(name: &str, parent_id: Option<i64>) -> Self {
        NewCategory {
            name: name.to_string(),
            slug: slugify(name),
            parent_id,
            visible: true,
            display_order: 0,
        }
    }

    pub fn with_slug(name: &str, slug: &str, parent_id: Option<i64>) -> Self {
        NewCategory {
            slug: slug.to_string(),
            ..NewCategory::new(name, parent_id)
        }
    }
}

/// "Vials & Caps (2mL)" → "vials-caps-2ml"
pub fn slugify(name: &str) -> String {
    let lower = name.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

// ============================================================================
// CATEGORY SNAPSHOT
// ============================================================================

/// Immutable view of the taxonomy, loaded once per run.
///
/// Indexed by id and by slug. Passed explicitly into the Matcher and the
/// Consolidator; never mutated after construction.
#[derive(Debug, Clone, Default)]
pub struct CategorySnapshot {
    by_id: HashMap<i64, Category>,
    by_slug: HashMap<String, i64>,
    children: HashMap<i64, Vec<i64>>,
}

impl CategorySnapshot {
    pub fn new(categories: Vec<Category>) -> Self {
        let mut snapshot = CategorySnapshot::default();

        for category in categories {
            if let Some(parent_id) = category.parent_id {
                snapshot.children.entry(parent_id).or_default().push(category.id);
            }
            snapshot.by_slug.insert(category.slug.clone(), category.id);
            snapshot.by_id.insert(category.id, category);
        }

        for ids in snapshot.children.values_mut() {
            ids.sort_unstable();
        }

        snapshot
    }

    pub fn get(&self, id: i64) -> Option<&Category> {
        self.by_id.get(&id)
    }

    pub fn find_by_slug(&self, slug: &str) -> Option<&Category> {
        self.by_slug.get(slug).and_then(|id| self.by_id.get(id))
    }

    pub fn contains(&self, id: i64) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// All categories ordered by id
    pub fn all(&self) -> Vec<&Category> {
        let mut all: Vec<&Category> = self.by_id.values().collect();
        all.sort_by_key(|c| c.id);
        all
    }

    /// Direct children ordered by id
    pub fn children(&self, parent_id: i64) -> Vec<&Category> {
        self.children
            .get(&parent_id)
            .map(|ids| ids.iter().filter_map(|id| self.by_id.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn has_children(&self, id: i64) -> bool {
        self.children.get(&id).is_some_and(|ids| !ids.is_empty())
    }

    /// True if `ancestor_id` is `descendant_id` or one of its ancestors
    pub fn is_ancestor(&self, ancestor_id: i64, descendant_id: i64) -> bool {
        let mut current = Some(descendant_id);
        let mut steps = 0;

        while let Some(id) = current {
            if id == ancestor_id {
                return true;
            }
            steps += 1;
            if steps > self.by_id.len() {
                return false;
            }
            current = self.by_id.get(&id).and_then(|c| c.parent_id);
        }

        false
    }

    /// Ids of nodes whose parent chain never reaches a root.
    ///
    /// Empty for a well-formed taxonomy.
    pub fn cycles(&self) -> Vec<i64> {
        self.all()
            .into_iter()
            .filter(|c| {
                let mut current = c.parent_id;
                let mut steps = 0;
                while let Some(id) = current {
                    steps += 1;
                    if id == c.id || steps > self.by_id.len() {
                        return true;
                    }
                    current = self.by_id.get(&id).and_then(|p| p.parent_id);
                }
                false
            })
            .map(|c| c.id)
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
