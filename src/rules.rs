// 🏷️ Classification Rules - Rules as Data
// Pattern rules mapping item text to a target category

use crate::error::EngineError;
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

// ============================================================================
// PATTERN
// ============================================================================

/// Case-insensitive text test.
///
/// Without `*`: substring match ("vial" matches "Autosampler Vial, 2mL").
/// With `*`: anchored wildcard ("agilent*" = starts with, "*vial" = ends with).
/// Blank patterns never match.
pub fn pattern_matches(pattern: &str, text: &str) -> bool {
    let pattern_lower = pattern.trim().to_lowercase();
    if pattern_lower.is_empty() || pattern_lower.chars().all(|c| c == '*') {
        return false;
    }
    let text_lower = text.to_lowercase();

    if !pattern_lower.contains('*') {
        return text_lower.contains(&pattern_lower);
    }

    let parts: Vec<&str> = pattern_lower.split('*').collect();
    let first = parts[0];
    let last = parts[parts.len() - 1];

    if !text_lower.starts_with(first) {
        return false;
    }

    // Middle parts appear in order after the prefix
    let mut current_pos = first.len();
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match text_lower[current_pos..].find(part) {
            Some(pos) => current_pos += pos + part.len(),
            None => return false,
        }
    }

    // Suffix must not overlap what was already consumed
    text_lower.len() - current_pos >= last.len() && text_lower.ends_with(last)
}

// ============================================================================
// RULE DEFINITION
// ============================================================================

/// Target of a rule: a category id or a category slug
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryRef {
    Id(i64),
    Slug(String),
}

impl fmt::Display for CategoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryRef::Id(id) => write!(f, "#{}", id),
            CategoryRef::Slug(slug) => write!(f, "'{}'", slug),
        }
    }
}

impl From<i64> for CategoryRef {
    fn from(id: i64) -> Self {
        CategoryRef::Id(id)
    }
}

impl From<&str> for CategoryRef {
    fn from(slug: &str) -> Self {
        CategoryRef::Slug(slug.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule ID for tracking (unique within a registry)
    pub id: String,

    /// Priority (higher = evaluated first)
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// Item matches if ANY include pattern matches
    pub include: Vec<String>,

    /// Item is disqualified if ANY exclude pattern matches
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Category to assign
    pub category: CategoryRef,

    /// Description/notes about this rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_priority() -> i32 {
    0
}

impl Rule {
    pub fn new(id: &str, priority: i32, include: &[&str], category: impl Into<CategoryRef>) -> Self {
        Rule {
            id: id.to_string(),
            priority,
            include: include.iter().map(|p| p.to_string()).collect(),
            exclude: Vec::new(),
            category: category.into(),
            description: None,
        }
    }

    pub fn excluding(mut self, exclude: &[&str]) -> Self {
        self.exclude = exclude.iter().map(|p| p.to_string()).collect();
        self
    }

    /// A rule with no include patterns can never match
    pub fn has_includes(&self) -> bool {
        self.include.iter().any(|p| !p.trim().is_empty())
    }

    pub fn includes_match(&self, text: &str) -> bool {
        self.include.iter().any(|p| pattern_matches(p, text))
    }

    pub fn excludes_match(&self, text: &str) -> bool {
        self.exclude.iter().any(|p| pattern_matches(p, text))
    }

    /// Any include matches and no exclude matches
    pub fn matches(&self, text: &str) -> bool {
        self.includes_match(text) && !self.excludes_match(text)
    }
}

// ============================================================================
// RULE REGISTRY
// ============================================================================

#[derive(Debug, Deserialize)]
struct RuleFile {
    version: String,
    rules: Vec<Rule>,
}

/// Versioned, ordered rule set.
///
/// Ordering: priority descending, then registration order. The sort is
/// stable, so equal priorities never get reshuffled by any other key.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    version: String,
    rules: Vec<Rule>,
}

impl RuleRegistry {
    /// Create a new empty registry
    pub fn new(version: &str) -> Self {
        RuleRegistry {
            version: version.to_string(),
            rules: Vec::new(),
        }
    }

    /// Create registry from rules given in registration order
    pub fn from_rules(version: &str, rules: Vec<Rule>) -> crate::error::Result<Self> {
        let mut registry = RuleRegistry::new(version);
        for rule in rules {
            registry.register(rule)?;
        }
        Ok(registry)
    }

    /// Load rules from a JSON file: `{ "version": "...", "rules": [...] }`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read rules file: {:?}", path.as_ref()))?;

        let file: RuleFile =
            serde_json::from_str(&content).context("Failed to parse rules JSON")?;

        RuleRegistry::from_rules(&file.version, file.rules)
            .with_context(|| format!("Invalid rule set in {:?}", path.as_ref()))
    }

    /// Add a rule after all previously registered rules of equal priority
    pub fn register(&mut self, rule: Rule) -> crate::error::Result<()> {
        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(EngineError::Config(format!("Duplicate rule id: {}", rule.id)));
        }
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(())
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get number of rules loaded
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// SHA-256 over the ordered rules, hex encoded
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.version.as_bytes());
        for rule in &self.rules {
            // Rule serialization cannot fail: plain strings and integers
            let json = serde_json::to_string(rule).unwrap_or_default();
            hasher.update(json.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }

    /// Categories referenced by at least one rule
    pub fn targets(&self) -> HashSet<&CategoryRef> {
        self.rules.iter().map(|r| &r.category).collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
