// 🏷️ Category Classifier - suggest categories for bank transactions
//
// The engine only sees the `CategoryClassifier` trait. `RuleClassifier` is
// the in-process implementation: rules as data, wildcard patterns,
// priorities, loaded from JSON.

use anyhow::{Context as AnyhowContext, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::models::BankTransaction;

/// One ranked suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySuggestion {
    pub category: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

/// Collaborator that classifies a bank transaction.
///
/// Suggestions come back best-first; an empty list means "no idea".
#[async_trait]
pub trait CategoryClassifier: Send + Sync {
    async fn classify(&self, transaction: &BankTransaction) -> Result<Vec<CategorySuggestion>>;
}

/// Classifier that never suggests anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopClassifier;

#[async_trait]
impl CategoryClassifier for NoopClassifier {
    async fn classify(&self, _transaction: &BankTransaction) -> Result<Vec<CategorySuggestion>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    /// Rule ID for tracking
    pub id: String,

    /// Pattern to match (supports wildcards with *)
    pub pattern: String,

    /// Category to assign
    pub category: String,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f64,

    /// Priority (higher = ranked first)
    #[serde(default)]
    pub priority: i32,
}

impl CategoryRule {
    /// Case-insensitive match; `*` matches any run of characters
    pub fn matches(&self, text: &str) -> bool {
        let pattern = self.pattern.to_lowercase();
        let text = text.to_lowercase();

        if !pattern.contains('*') {
            return text.contains(&pattern);
        }

        let parts: Vec<&str> = pattern.split('*').collect();
        let first = parts[0];
        let last = parts[parts.len() - 1];

        if !text.starts_with(first) || !text.ends_with(last) {
            return false;
        }
        if first.len() + last.len() > text.len() {
            return false;
        }

        // Middle parts must appear in order between prefix and suffix
        let mut cursor = first.len();
        let end = text.len() - last.len();
        for part in &parts[1..parts.len() - 1] {
            if part.is_empty() {
                continue;
            }
            match text[cursor..end].find(part) {
                Some(pos) => cursor += pos + part.len(),
                None => return false,
            }
        }

        true
    }
}

// ============================================================================
// RULE CLASSIFIER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RuleClassifier {
    rules: Vec<CategoryRule>,
}

impl RuleClassifier {
    pub fn new() -> Self {
        RuleClassifier { rules: Vec::new() }
    }

    /// Load rules from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read rules file: {:?}", path.as_ref()))?;

        let rules: Vec<CategoryRule> =
            serde_json::from_str(&content).context("Failed to parse rules JSON")?;

        Ok(RuleClassifier::from_rules(rules))
    }

    pub fn from_rules(mut rules: Vec<CategoryRule>) -> Self {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        RuleClassifier { rules }
    }

    pub fn add_rule(&mut self, rule: CategoryRule) {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Every matching rule, highest priority first, one suggestion per category
    pub fn suggest(&self, transaction: &BankTransaction) -> Vec<CategorySuggestion> {
        let merchant = transaction.merchant_name.as_deref().unwrap_or_default();
        let mut suggestions: Vec<CategorySuggestion> = Vec::new();

        for rule in &self.rules {
            let hit = rule.matches(&transaction.description)
                || (!merchant.is_empty() && rule.matches(merchant));
            if !hit || suggestions.iter().any(|s| s.category == rule.category) {
                continue;
            }

            suggestions.push(CategorySuggestion {
                category: rule.category.clone(),
                confidence: rule.confidence,
                rule_id: Some(rule.id.clone()),
            });
        }

        suggestions
    }
}

#[async_trait]
impl CategoryClassifier for RuleClassifier {
    async fn classify(&self, transaction: &BankTransaction) -> Result<Vec<CategorySuggestion>> {
        Ok(self.suggest(transaction))
    }
}

// ============================================================================
// TESTS
// ============================================================================
