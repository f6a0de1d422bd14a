// 📦 Item - externally owned catalog entity
//
// The engine only reads items. Text fields feed the Matcher.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Stable identity owned by the catalog
    pub id: i64,

    /// Product name (e.g., "Agilent C18 Analytical Column")
    #[serde(default)]
    pub name: Option<String>,

    /// Free-text type hint (e.g., "HPLC Column")
    #[serde(default)]
    pub type_hint: Option<String>,

    /// Free-text brand hint (e.g., "Agilent")
    #[serde(default)]
    pub brand: Option<String>,
}

impl Item {
    pub fn new(id: i64, name: &str) -> Self {
        Item {
            id,
            name: Some(name.to_string()),
            type_hint: None,
            brand: None,
        }
    }

    pub fn with_hints(id: i64, name: &str, type_hint: Option<&str>, brand: Option<&str>) -> Self {
        Item {
            id,
            name: Some(name.to_string()),
            type_hint: type_hint.map(str::to_string),
            brand: brand.map(str::to_string),
        }
    }

    /// Text the Matcher tests patterns against.
    ///
    /// Non-blank fields joined by a single space, in the order
    /// name, type hint, brand. `None` when no field carries text.
    pub fn match_text(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.name, &self.type_hint, &self.brand]
            .into_iter()
            .filter_map(|f| f.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    pub fn is_malformed(&self) -> bool {
        self.match_text().is_none()
    }
}
