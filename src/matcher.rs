// 🔗 Matcher - pair bank transactions with app transactions in two passes
//
// Pass 1 (exact): FIRST-fit. Exact agreement is rare enough that the first
//                 candidate over the bar is the right one.
// Pass 2 (fuzzy): BEST-fit. Tolerant scores are close to each other, taking
//                 the first would mis-pair neighbours.
//
// A transaction already on either side of any match record is off the table.

use std::collections::HashSet;
use tracing::debug;

use crate::book::RecordBook;
use crate::config::MatchingConfig;
use crate::models::{
    AppTransaction, BankTransaction, MatchStatus, MatchType, ReconciliationMatch,
};
use crate::scoring::{exact_score, fuzzy_score, MatchScore};

/// Transaction ids already used by some match record
#[derive(Debug, Default)]
struct Claimed {
    bank: HashSet<String>,
    app: HashSet<String>,
}

impl Claimed {
    fn from_book(book: &RecordBook<ReconciliationMatch>) -> Self {
        let mut claimed = Claimed::default();
        for record in book.iter() {
            if let Some(id) = record.bank_id() {
                claimed.bank.insert(id.to_string());
            }
            if let Some(id) = record.app_id() {
                claimed.app.insert(id.to_string());
            }
        }
        claimed
    }

    fn claim(&mut self, bank: &BankTransaction, app: &AppTransaction) {
        self.bank.insert(bank.id.clone());
        self.app.insert(app.id.clone());
    }
}

pub struct Matcher {
    config: MatchingConfig,
}

impl Matcher {
    pub fn new(config: MatchingConfig) -> Self {
        Matcher { config }
    }

    /// Run both passes over the unmatched pools.
    ///
    /// New records are inserted into `book` and also returned.
    pub fn find_matches(
        &self,
        book: &mut RecordBook<ReconciliationMatch>,
        bank_transactions: &[BankTransaction],
        app_transactions: &[AppTransaction],
    ) -> Vec<ReconciliationMatch> {
        let mut claimed = Claimed::from_book(book);

        let mut created = self.exact_pass(bank_transactions, app_transactions, &mut claimed);
        created.extend(self.fuzzy_pass(bank_transactions, app_transactions, &mut claimed));

        for record in &created {
            book.insert(record.clone());
        }

        created
    }

    fn exact_pass(
        &self,
        bank_transactions: &[BankTransaction],
        app_transactions: &[AppTransaction],
        claimed: &mut Claimed,
    ) -> Vec<ReconciliationMatch> {
        let mut created = Vec::new();

        for bank in bank_transactions {
            if claimed.bank.contains(&bank.id) {
                continue;
            }

            let hit = app_transactions
                .iter()
                .filter(|app| !claimed.app.contains(&app.id))
                .map(|app| (app, exact_score(bank, app)))
                .find(|(_, score)| score.confidence >= self.config.exact_threshold);

            if let Some((app, score)) = hit {
                debug!(
                    bank_id = %bank.id,
                    app_id = %app.id,
                    confidence = score.confidence,
                    "exact match"
                );
                claimed.claim(bank, app);
                created.push(ReconciliationMatch::paired(
                    bank,
                    app,
                    MatchType::Exact,
                    score.confidence,
                    score.reasons,
                    MatchStatus::Matched,
                ));
            }
        }

        created
    }

    fn fuzzy_pass(
        &self,
        bank_transactions: &[BankTransaction],
        app_transactions: &[AppTransaction],
        claimed: &mut Claimed,
    ) -> Vec<ReconciliationMatch> {
        let mut created = Vec::new();

        for bank in bank_transactions {
            if claimed.bank.contains(&bank.id) {
                continue;
            }

            let mut best: Option<(&AppTransaction, MatchScore)> = None;
            for app in app_transactions {
                if claimed.app.contains(&app.id) {
                    continue;
                }

                let score = fuzzy_score(bank, app);
                if score.confidence < self.config.fuzzy_threshold {
                    continue;
                }

                // Strictly greater: ties keep the earliest candidate
                let better = match &best {
                    Some((_, current)) => score.confidence > current.confidence,
                    None => true,
                };
                if better {
                    best = Some((app, score));
                }
            }

            if let Some((app, score)) = best {
                let status = if score.confidence >= self.config.fuzzy_accept_threshold {
                    MatchStatus::Matched
                } else {
                    MatchStatus::Conflict
                };

                debug!(
                    bank_id = %bank.id,
                    app_id = %app.id,
                    confidence = score.confidence,
                    status = status.as_str(),
                    "fuzzy match"
                );
                claimed.claim(bank, app);
                created.push(ReconciliationMatch::paired(
                    bank,
                    app,
                    MatchType::Fuzzy,
                    score.confidence,
                    score.reasons,
                    status,
                ));
            }
        }

        created
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(MatchingConfig::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================
