// 🔍 Duplicate Detector - find the same real-world event recorded twice
//
// Two sources of duplicate groups:
//   1. Within one list: near-identical lines (same amount, same moment,
//      same text) in the bank feed or in the app's own records
//   2. Across lists: weak fuzzy matches, which are as likely to be a
//      duplicate entry as a genuine pairing

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::DuplicateConfig;
use crate::models::{
    date_diff_ms, AppTransaction, BankTransaction, DuplicateAction, DuplicateEntry,
    DuplicateGroup, DuplicateType, MatchType, ReconciliationMatch,
};
use crate::scoring::AMOUNT_EPSILON;
use crate::similarity::similarity;

const AMOUNT_WEIGHT: f64 = 0.40;
const TIME_WEIGHT: f64 = 0.30;
const DESCRIPTION_WEIGHT: f64 = 0.30;

/// The fields duplicate scoring looks at, for either source
pub trait DuplicateCandidate {
    fn amount(&self) -> f64;
    fn date(&self) -> &DateTime<Utc>;
    fn description(&self) -> &str;
}

impl DuplicateCandidate for BankTransaction {
    fn amount(&self) -> f64 {
        self.amount
    }

    fn date(&self) -> &DateTime<Utc> {
        &self.date
    }

    fn description(&self) -> &str {
        &self.description
    }
}

impl DuplicateCandidate for AppTransaction {
    fn amount(&self) -> f64 {
        self.amount
    }

    fn date(&self) -> &DateTime<Utc> {
        &self.date
    }

    fn description(&self) -> &str {
        &self.description
    }
}

pub struct DuplicateDetector {
    config: DuplicateConfig,
}

impl DuplicateDetector {
    pub fn new(config: DuplicateConfig) -> Self {
        DuplicateDetector { config }
    }

    /// Pairwise duplicate score in [0, 1]
    pub fn duplicate_score<T: DuplicateCandidate>(&self, a: &T, b: &T) -> f64 {
        let mut score = 0.0;

        if (a.amount() - b.amount()).abs() < AMOUNT_EPSILON {
            score += AMOUNT_WEIGHT;
        }

        if date_diff_ms(a.date(), b.date()) <= self.config.time_window_secs * 1_000 {
            score += TIME_WEIGHT;
        }

        score += DESCRIPTION_WEIGHT * similarity(a.description(), b.description());

        score
    }

    /// Clusters within one list, as index lists.
    ///
    /// Each cluster is anchored on its first member; later items join when
    /// they score over the bar against the anchor, and are then out of play
    /// for the rest of the pass.
    fn clusters<T: DuplicateCandidate>(&self, items: &[T]) -> Vec<Vec<usize>> {
        let mut consumed = vec![false; items.len()];
        let mut clusters = Vec::new();

        for i in 0..items.len() {
            if consumed[i] {
                continue;
            }

            let mut cluster = vec![i];
            for j in (i + 1)..items.len() {
                if consumed[j] {
                    continue;
                }
                if self.duplicate_score(&items[i], &items[j]) >= self.config.group_threshold {
                    consumed[j] = true;
                    cluster.push(j);
                }
            }

            if cluster.len() > 1 {
                consumed[i] = true;
                clusters.push(cluster);
            }
        }

        clusters
    }

    /// Duplicate groups inside the bank feed
    pub fn detect_within_bank(&self, transactions: &[BankTransaction]) -> Vec<DuplicateGroup> {
        self.clusters(transactions)
            .into_iter()
            .filter_map(|cluster| {
                let entries = cluster
                    .into_iter()
                    .map(|i| DuplicateEntry::Bank(transactions[i].clone()))
                    .collect();
                DuplicateGroup::new(
                    entries,
                    DuplicateType::Exact,
                    self.config.exact_group_confidence,
                    DuplicateAction::KeepBank,
                )
            })
            .collect()
    }

    /// Duplicate groups inside the app's own records
    pub fn detect_within_app(&self, transactions: &[AppTransaction]) -> Vec<DuplicateGroup> {
        self.clusters(transactions)
            .into_iter()
            .filter_map(|cluster| {
                let entries = cluster
                    .into_iter()
                    .map(|i| DuplicateEntry::App(transactions[i].clone()))
                    .collect();
                DuplicateGroup::new(
                    entries,
                    DuplicateType::Exact,
                    self.config.exact_group_confidence,
                    DuplicateAction::KeepApp,
                )
            })
            .collect()
    }

    /// Weak, unreviewed fuzzy matches reported as potential duplicates.
    ///
    /// The match record itself is left untouched; the group points back to
    /// it through `match_id`.
    pub fn detect_cross<'a, I>(&self, matches: I) -> Vec<DuplicateGroup>
    where
        I: IntoIterator<Item = &'a ReconciliationMatch>,
    {
        matches
            .into_iter()
            .filter(|m| m.match_type == MatchType::Fuzzy && !m.is_reviewed())
            .filter(|m| m.confidence < self.config.potential_below)
            .filter_map(|m| {
                let (bank, app) = m.sides()?;
                let mut group = DuplicateGroup::new(
                    vec![
                        DuplicateEntry::Bank(bank.clone()),
                        DuplicateEntry::App(app.clone()),
                    ],
                    DuplicateType::Potential,
                    m.confidence,
                    DuplicateAction::Merge,
                )?;
                group.match_id = Some(m.id.clone());
                Some(group)
            })
            .collect()
    }

    /// All three scans in order: bank, app, cross
    pub fn detect_duplicates(
        &self,
        bank_transactions: &[BankTransaction],
        app_transactions: &[AppTransaction],
        matches: &[ReconciliationMatch],
    ) -> Vec<DuplicateGroup> {
        let mut groups = self.detect_within_bank(bank_transactions);
        let bank_groups = groups.len();

        groups.extend(self.detect_within_app(app_transactions));
        let app_groups = groups.len() - bank_groups;

        groups.extend(self.detect_cross(matches));

        debug!(
            bank_groups,
            app_groups,
            potential_groups = groups.len() - bank_groups - app_groups,
            "duplicate scan complete"
        );

        groups
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(DuplicateConfig::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================
