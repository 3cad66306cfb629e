// Recon Engine - Core Library
// Bank-feed reconciliation: matching, duplicates, conflicts, review state.
// Used by the CLI, the API server, and tests.

pub mod error;
pub mod models;
pub mod config;
pub mod logging;
pub mod similarity;     // Token-overlap text similarity
pub mod scoring;        // Exact / fuzzy pairing scores
pub mod book;           // Id-indexed record collections
pub mod matcher;        // Two-pass bank ↔ app matching
pub mod deduplication;  // Duplicate groups
pub mod conflicts;      // Field-level conflicts on matches
pub mod classifier;     // Category suggestions for unmatched bank lines
pub mod store;          // Key/value persistence
pub mod banking;        // Bank feed collaborator
pub mod import;         // CSV import
pub mod reconciliation; // The run orchestrator

// Re-export commonly used types
pub use error::{ReconError, Result};
pub use models::{
    AppTransaction, BankTransaction, BankTransactionStatus, ConflictResolution, ConflictType,
    DuplicateAction, DuplicateEntry, DuplicateGroup, DuplicateType, MatchStatus, MatchType,
    ReconciliationConflict, ReconciliationMatch, ReconciliationSummary, SuggestedResolution,
    TransactionType,
};
pub use config::ReconciliationConfig;
pub use similarity::similarity;
pub use scoring::{exact_score, fuzzy_score, MatchScore};
pub use matcher::Matcher;
pub use deduplication::DuplicateDetector;
pub use conflicts::identify_conflicts;
pub use classifier::{
    CategoryClassifier, CategoryRule, CategorySuggestion, NoopClassifier, RuleClassifier,
};
pub use store::{MemoryStore, ReconciliationStore, SqliteStore};
pub use banking::{collect_transactions, BankConnection, BankingProvider, Provider};
pub use reconciliation::ReconciliationEngine;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
