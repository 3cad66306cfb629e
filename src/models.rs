// 📒 Reconciliation Records - transactions on both sides and everything
// the engine derives from them (matches, conflicts, duplicate groups).
//
// Transactions are VALUES handed to us by collaborators. Matches, conflicts
// and duplicate groups are owned by the engine and persisted as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ReconError;

/// One millisecond-exact day, the unit every date tolerance is expressed in
pub const DAY_MS: i64 = 86_400_000;

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Absolute distance between two instants in milliseconds
pub fn date_diff_ms(a: &DateTime<Utc>, b: &DateTime<Utc>) -> i64 {
    (*a - *b).num_milliseconds().abs()
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Debit,
    Credit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Debit => "debit",
            TransactionType::Credit => "credit",
        }
    }
}

impl FromStr for TransactionType {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debit" => Ok(TransactionType::Debit),
            "credit" => Ok(TransactionType::Credit),
            other => Err(ReconError::InvalidInput(format!(
                "unknown transaction type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BankTransactionStatus {
    Pending,
    #[default]
    Posted,
    Cancelled,
}

/// Transaction as reported by the bank feed.
///
/// Immutable from the engine's point of view, except for the category that
/// auto-categorization may attach to an unmatched transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankTransaction {
    pub id: String,
    pub account_id: String,
    pub amount: f64,
    pub currency: String,
    pub description: String,
    pub date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default)]
    pub status: BankTransactionStatus,
}

/// Transaction recorded by the user or synced earlier by the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppTransaction {
    pub id: String,
    pub amount: f64,
    pub date: DateTime<Utc>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

// ============================================================================
// MATCHES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Fuzzy,
    Manual,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Matched,
    Unmatched,
    Conflict,
    Duplicate,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Matched => "matched",
            MatchStatus::Unmatched => "unmatched",
            MatchStatus::Conflict => "conflict",
            MatchStatus::Duplicate => "duplicate",
        }
    }
}

/// Link between zero-or-one bank transaction and zero-or-one app transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationMatch {
    pub id: String,
    #[serde(default)]
    pub bank_transaction: Option<BankTransaction>,
    #[serde(default)]
    pub app_transaction: Option<AppTransaction>,
    pub match_type: MatchType,
    pub confidence: f64,
    #[serde(default)]
    pub match_reasons: Vec<String>,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
}

impl ReconciliationMatch {
    /// Create an automatic pairing of a bank and an app transaction
    pub fn paired(
        bank: &BankTransaction,
        app: &AppTransaction,
        match_type: MatchType,
        confidence: f64,
        match_reasons: Vec<String>,
        status: MatchStatus,
    ) -> Self {
        ReconciliationMatch {
            id: new_id(),
            bank_transaction: Some(bank.clone()),
            app_transaction: Some(app.clone()),
            match_type,
            confidence: confidence.clamp(0.0, 1.0),
            match_reasons,
            status,
            created_at: Utc::now(),
            reviewed_at: None,
            reviewed_by: None,
        }
    }

    pub fn bank_id(&self) -> Option<&str> {
        self.bank_transaction.as_ref().map(|tx| tx.id.as_str())
    }

    pub fn app_id(&self) -> Option<&str> {
        self.app_transaction.as_ref().map(|tx| tx.id.as_str())
    }

    pub fn is_reviewed(&self) -> bool {
        self.reviewed_at.is_some()
    }

    /// Both sides present - only these can carry field conflicts
    pub fn sides(&self) -> Option<(&BankTransaction, &AppTransaction)> {
        match (&self.bank_transaction, &self.app_transaction) {
            (Some(bank), Some(app)) => Some((bank, app)),
            _ => None,
        }
    }
}

// ============================================================================
// CONFLICTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    Amount,
    Date,
    Description,
    Category,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::Amount => "amount",
            ConflictType::Date => "date",
            ConflictType::Description => "description",
            ConflictType::Category => "category",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedResolution {
    UseBank,
    UseApp,
    Merge,
    ManualReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    UseBank,
    UseApp,
    Merge,
    Ignore,
}

impl FromStr for ConflictResolution {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "use_bank" => Ok(ConflictResolution::UseBank),
            "use_app" => Ok(ConflictResolution::UseApp),
            "merge" => Ok(ConflictResolution::Merge),
            "ignore" => Ok(ConflictResolution::Ignore),
            other => Err(ReconError::InvalidInput(format!(
                "unknown conflict resolution: {}",
                other
            ))),
        }
    }
}

/// One field-level disagreement between the two sides of a match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationConflict {
    pub id: String,
    pub match_id: String,
    pub conflict_type: ConflictType,
    pub bank_value: serde_json::Value,
    pub app_value: serde_json::Value,
    pub suggested_resolution: SuggestedResolution,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
}

impl ReconciliationConflict {
    pub fn new(
        match_id: &str,
        conflict_type: ConflictType,
        bank_value: serde_json::Value,
        app_value: serde_json::Value,
        suggested_resolution: SuggestedResolution,
        confidence: f64,
    ) -> Self {
        ReconciliationConflict {
            id: new_id(),
            match_id: match_id.to_string(),
            conflict_type,
            bank_value,
            app_value,
            suggested_resolution,
            confidence,
            created_at: Utc::now(),
            resolved_at: None,
            resolution: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

// ============================================================================
// DUPLICATE GROUPS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateType {
    Exact,
    Similar,
    Potential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateAction {
    KeepBank,
    KeepApp,
    Merge,
    KeepAll,
}

impl FromStr for DuplicateAction {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "keep_bank" => Ok(DuplicateAction::KeepBank),
            "keep_app" => Ok(DuplicateAction::KeepApp),
            "merge" => Ok(DuplicateAction::Merge),
            "keep_all" => Ok(DuplicateAction::KeepAll),
            other => Err(ReconError::InvalidInput(format!(
                "unknown duplicate resolution: {}",
                other
            ))),
        }
    }
}

/// Member of a duplicate group, from either source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "transaction", rename_all = "lowercase")]
pub enum DuplicateEntry {
    Bank(BankTransaction),
    App(AppTransaction),
}

impl DuplicateEntry {
    pub fn id(&self) -> &str {
        match self {
            DuplicateEntry::Bank(tx) => &tx.id,
            DuplicateEntry::App(tx) => &tx.id,
        }
    }
}

/// Cluster of two or more transactions judged to be the same real-world event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub id: String,
    pub transactions: Vec<DuplicateEntry>,
    pub duplicate_type: DuplicateType,
    pub confidence: f64,
    pub suggested_action: DuplicateAction,
    /// Match this group was derived from (potential duplicates only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<DuplicateAction>,
}

impl DuplicateGroup {
    /// Build a group; fewer than two members is not a group
    pub fn new(
        transactions: Vec<DuplicateEntry>,
        duplicate_type: DuplicateType,
        confidence: f64,
        suggested_action: DuplicateAction,
    ) -> Option<Self> {
        if transactions.len() < 2 {
            return None;
        }

        Some(DuplicateGroup {
            id: new_id(),
            transactions,
            duplicate_type,
            confidence,
            suggested_action,
            match_id: None,
            created_at: Utc::now(),
            resolved_at: None,
            resolution: None,
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    pub fn contains(&self, transaction_id: &str) -> bool {
        self.transactions.iter().any(|entry| entry.id() == transaction_id)
    }
}

// ============================================================================
// SUMMARY
// ============================================================================

/// Derived snapshot of one run. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationSummary {
    pub total_bank_transactions: usize,
    pub total_app_transactions: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub conflicts: usize,
    pub duplicates: usize,
    pub accuracy: f64,
    pub last_reconciliation: DateTime<Utc>,
}

impl fmt::Display for ReconciliationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bank / {} app transactions: {} matched, {} unmatched, {} conflicts, {} duplicate groups, accuracy {:.1}%",
            self.total_bank_transactions,
            self.total_app_transactions,
            self.matched,
            self.unmatched,
            self.conflicts,
            self.duplicates,
            self.accuracy * 100.0
        )
    }
}
