// 🎯 Matcher - first-match-wins over the priority-ordered rules
//
// classify() and classify_traced() are pure functions of (item, rules).
// Matcher adds per-run rule validation against the category snapshot.

use crate::entities::{CategorySnapshot, Item};
use crate::error::{EngineError, Result};
use crate::rules::{CategoryRef, Rule};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

// ============================================================================
// PURE CLASSIFICATION
// ============================================================================

/// First rule (in the given order) whose includes match and excludes don't.
/// Items without usable text never match.
pub fn classify<'r>(item: &Item, rules: &'r [Rule]) -> Option<&'r Rule> {
    let text = item.match_text()?;
    rules.iter().find(|rule| rule.matches(&text))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleOutcome {
    Matched,
    NoIncludeMatch,
    Excluded,
    NoIncludePatterns,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub rule_id: String,
    pub priority: i32,

    /// Position in evaluation order (priority, then registration)
    pub position: usize,

    pub outcome: RuleOutcome,
}

/// Tie-break trace: every rule evaluated up to and including the winner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchTrace {
    pub item_id: i64,
    pub winner: Option<String>,
    pub evaluations: Vec<RuleEvaluation>,
}

impl MatchTrace {
    /// Rules that also matched on includes but were excluded
    pub fn excluded(&self) -> Vec<&str> {
        self.evaluations
            .iter()
            .filter(|e| e.outcome == RuleOutcome::Excluded)
            .map(|e| e.rule_id.as_str())
            .collect()
    }
}

pub fn classify_traced(item: &Item, rules: &[Rule]) -> MatchTrace {
    let mut trace = MatchTrace {
        item_id: item.id,
        ..MatchTrace::default()
    };

    let Some(text) = item.match_text() else {
        return trace;
    };

    for (position, rule) in rules.iter().enumerate() {
        let outcome = if !rule.has_includes() {
            RuleOutcome::NoIncludePatterns
        } else if !rule.includes_match(&text) {
            RuleOutcome::NoIncludeMatch
        } else if rule.excludes_match(&text) {
            RuleOutcome::Excluded
        } else {
            RuleOutcome::Matched
        };

        trace.evaluations.push(RuleEvaluation {
            rule_id: rule.id.clone(),
            priority: rule.priority,
            position,
            outcome,
        });

        if outcome == RuleOutcome::Matched {
            trace.winner = Some(rule.id.clone());
            break;
        }
    }

    trace
}

// ============================================================================
// PER-RUN MATCHER
// ============================================================================

/// Why a rule was taken out of the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisabledReason {
    EmptyInclude,
    MissingTargetCategory(String),
}

/// Winning rule and the category it resolves to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub rule_id: String,
    pub category_id: i64,
}

/// Rules validated once against the run's category snapshot.
///
/// Misconfigured rules are logged once here and skipped for every item.
pub struct Matcher<'a> {
    rules: Vec<(&'a Rule, i64)>,
    disabled: BTreeMap<String, DisabledReason>,
}

impl<'a> Matcher<'a> {
    pub fn new(rules: &'a [Rule], snapshot: &CategorySnapshot) -> Self {
        let mut active = Vec::with_capacity(rules.len());
        let mut disabled = BTreeMap::new();

        for rule in rules {
            if !rule.has_includes() {
                warn!(rule_id = %rule.id, "Rule has no include patterns; skipping for this run");
                disabled.insert(rule.id.clone(), DisabledReason::EmptyInclude);
                continue;
            }

            match resolve_target(&rule.category, snapshot) {
                Some(category_id) => active.push((rule, category_id)),
                None => {
                    let err = EngineError::MissingTargetCategory {
                        rule_id: rule.id.clone(),
                        target: rule.category.to_string(),
                    };
                    warn!("{}; skipping for this run", err);
                    disabled.insert(
                        rule.id.clone(),
                        DisabledReason::MissingTargetCategory(rule.category.to_string()),
                    );
                }
            }
        }

        Matcher {
            rules: active,
            disabled,
        }
    }

    /// `Err(MalformedItem)` for items without text, `Ok(None)` when no rule matches
    pub fn resolve(&self, item: &Item) -> Result<Option<Resolution>> {
        let text = item
            .match_text()
            .ok_or(EngineError::MalformedItem(item.id))?;

        Ok(self
            .rules
            .iter()
            .find(|(rule, _)| rule.matches(&text))
            .map(|(rule, category_id)| Resolution {
                rule_id: rule.id.clone(),
                category_id: *category_id,
            }))
    }

    pub fn disabled(&self) -> &BTreeMap<String, DisabledReason> {
        &self.disabled
    }

    pub fn active_rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Active categories, deduplicated
    pub fn target_categories(&self) -> HashSet<i64> {
        self.rules.iter().map(|(_, id)| *id).collect()
    }
}

fn resolve_target(target: &CategoryRef, snapshot: &CategorySnapshot) -> Option<i64> {
    match target {
        CategoryRef::Id(id) => snapshot.get(*id).map(|c| c.id),
        CategoryRef::Slug(slug) => snapshot.find_by_slug(slug).map(|c| c.id),
    }
}

// ============================================================================
// TESTS
// ============================================================================
