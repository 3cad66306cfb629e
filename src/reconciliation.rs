// ⚖️ Reconciliation Engine - bank feed vs. the user's own records
//
// One run, start to finish:
//   clear unreviewed state → exact pass → fuzzy pass → duplicates (bank)
//   → duplicates (app) → potential duplicates → conflicts
//   → categorize unmatched bank transactions → persist → summarize
//
// Reviewed matches and resolved conflicts/duplicate groups are human
// decisions and survive every run. Everything else is recomputed.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::book::{Record, RecordBook};
use crate::classifier::CategoryClassifier;
use crate::config::ReconciliationConfig;
use crate::conflicts::identify_conflicts;
use crate::deduplication::DuplicateDetector;
use crate::error::{ReconError, Result};
use crate::matcher::Matcher;
use crate::models::{
    AppTransaction, BankTransaction, ConflictResolution, DuplicateAction, DuplicateGroup,
    MatchStatus, MatchType, ReconciliationConflict, ReconciliationMatch, ReconciliationSummary,
};
use crate::store::{ReconciliationStore, CONFLICTS_KEY, DUPLICATES_KEY, MATCHES_KEY};

// ============================================================================
// ENGINE STATE
// ============================================================================

#[derive(Debug, Default)]
struct EngineState {
    matches: RecordBook<ReconciliationMatch>,
    conflicts: RecordBook<ReconciliationConflict>,
    duplicates: RecordBook<DuplicateGroup>,
    last_summary: Option<ReconciliationSummary>,
}

/// (bank id, app id) of a two-sided match; stable across runs, unlike its id
type PairKey = (String, String);

fn pair_key(record: &ReconciliationMatch) -> Option<PairKey> {
    record
        .sides()
        .map(|(bank, app)| (bank.id.clone(), app.id.clone()))
}

/// Sorted member ids; the same transactions give the same key
fn member_key(group: &DuplicateGroup) -> Vec<String> {
    let mut ids: Vec<String> = group
        .transactions
        .iter()
        .map(|entry| entry.id().to_string())
        .collect();
    ids.sort();
    ids
}

impl EngineState {
    /// Drop unreviewed matches and everything unsettled.
    ///
    /// Returns the pair each dropped match covered, keyed by its old id.
    fn clear_unreviewed(&mut self) -> HashMap<String, PairKey> {
        let dropped: HashMap<String, PairKey> = self
            .matches
            .iter()
            .filter(|m| !m.is_reviewed())
            .filter_map(|m| pair_key(m).map(|key| (m.id.clone(), key)))
            .collect();

        self.matches.retain(|m| m.is_reviewed());
        self.conflicts.retain(|c| c.is_resolved());
        self.duplicates.retain(|g| g.is_resolved());

        dropped
    }

    /// Point resolved conflicts and groups at the current match for their pair.
    ///
    /// Records whose pair is no longer matched are dropped.
    fn relink_resolved(&mut self, dropped: &HashMap<String, PairKey>) {
        let current: HashMap<PairKey, String> = self
            .matches
            .iter()
            .filter_map(|m| pair_key(m).map(|key| (key, m.id.clone())))
            .collect();
        let matches = &self.matches;
        let relink = |match_id: &str| -> Option<String> {
            if matches.get(match_id).is_some() {
                return Some(match_id.to_string());
            }
            dropped.get(match_id).and_then(|key| current.get(key)).cloned()
        };

        let before = self.conflicts.len() + self.duplicates.len();

        let conflicts = self
            .conflicts
            .records()
            .iter()
            .filter_map(|c| {
                let match_id = relink(&c.match_id)?;
                Some(ReconciliationConflict {
                    match_id,
                    ..c.clone()
                })
            })
            .collect();

        let duplicates = self
            .duplicates
            .records()
            .iter()
            .filter_map(|g| match &g.match_id {
                None => Some(g.clone()),
                Some(old) => {
                    let match_id = relink(old)?;
                    Some(DuplicateGroup {
                        match_id: Some(match_id),
                        ..g.clone()
                    })
                }
            })
            .collect();

        self.conflicts = RecordBook::from_records(conflicts);
        self.duplicates = RecordBook::from_records(duplicates);

        debug!(
            dropped = before - self.conflicts.len() - self.duplicates.len(),
            "relinked resolved records"
        );
    }

    /// Remove conflicts and groups derived from the given matches
    fn forget_derived(&mut self, match_ids: &HashSet<String>, keep_resolved: bool) {
        self.conflicts
            .retain(|c| !match_ids.contains(&c.match_id) || (keep_resolved && c.is_resolved()));
        self.duplicates.retain(|g| match &g.match_id {
            Some(id) => !match_ids.contains(id) || (keep_resolved && g.is_resolved()),
            None => true,
        });
    }

    fn encode_all(&self) -> Vec<(&'static str, serde_json::Value)> {
        [
            encode(MATCHES_KEY, self.matches.records()),
            encode(CONFLICTS_KEY, self.conflicts.records()),
            encode(DUPLICATES_KEY, self.duplicates.records()),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

fn encode<T: Serialize>(key: &'static str, records: &[T]) -> Option<(&'static str, serde_json::Value)> {
    match serde_json::to_value(records) {
        Ok(value) => Some((key, value)),
        Err(e) => {
            warn!(key, error = %e, "failed to encode reconciliation state");
            None
        }
    }
}

fn load_collection<T>(store: &dyn ReconciliationStore, key: &str) -> Result<Vec<T>>
where
    T: DeserializeOwned,
{
    match store.load(key)? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(Vec::new()),
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    config: ReconciliationConfig,
    matcher: Matcher,
    detector: DuplicateDetector,
    store: Arc<dyn ReconciliationStore>,
    classifier: Arc<dyn CategoryClassifier>,

    /// Held for the whole of a run, so runs never interleave
    state: Mutex<EngineState>,
}

impl ReconciliationEngine {
    /// Build an engine and load the three persisted collections
    pub fn open(
        config: ReconciliationConfig,
        store: Arc<dyn ReconciliationStore>,
        classifier: Arc<dyn CategoryClassifier>,
    ) -> Result<Self> {
        config.validate()?;

        let matches: Vec<ReconciliationMatch> = load_collection(store.as_ref(), MATCHES_KEY)?;
        let conflicts: Vec<ReconciliationConflict> =
            load_collection(store.as_ref(), CONFLICTS_KEY)?;
        let duplicates: Vec<DuplicateGroup> = load_collection(store.as_ref(), DUPLICATES_KEY)?;

        info!(
            matches = matches.len(),
            conflicts = conflicts.len(),
            duplicates = duplicates.len(),
            "loaded reconciliation state"
        );

        Ok(ReconciliationEngine {
            matcher: Matcher::new(config.matching.clone()),
            detector: DuplicateDetector::new(config.duplicates.clone()),
            config,
            store,
            classifier,
            state: Mutex::new(EngineState {
                matches: RecordBook::from_records(matches),
                conflicts: RecordBook::from_records(conflicts),
                duplicates: RecordBook::from_records(duplicates),
                last_summary: None,
            }),
        })
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    /// Reconcile one batch.
    ///
    /// Unmatched bank transactions may get a category attached in place.
    /// Classifier and store failures are logged, never returned.
    #[instrument(skip_all, fields(bank = bank_transactions.len(), app = app_transactions.len()))]
    pub async fn reconcile(
        &self,
        bank_transactions: &mut [BankTransaction],
        app_transactions: &[AppTransaction],
    ) -> ReconciliationSummary {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        // Clear unreviewed state
        let before = state.matches.len();
        let dropped = state.clear_unreviewed();
        debug!(
            discarded = before - state.matches.len(),
            kept = state.matches.len(),
            "cleared unreviewed matches"
        );

        // Exact + fuzzy passes
        let created = self
            .matcher
            .find_matches(&mut state.matches, bank_transactions, app_transactions);
        info!(created = created.len(), "matching complete");

        state.relink_resolved(&dropped);

        // Duplicates: bank, app, then weak fuzzy matches.
        // A group already resolved for the same transactions is not raised again.
        let settled_groups: HashSet<Vec<String>> = state.duplicates.iter().map(member_key).collect();
        let mut groups = self.detector.detect_within_bank(bank_transactions);
        groups.extend(self.detector.detect_within_app(app_transactions));
        groups.extend(self.detector.detect_cross(state.matches.iter()));
        groups.retain(|g| !settled_groups.contains(&member_key(g)));
        info!(groups = groups.len(), "duplicate detection complete");
        for group in groups {
            state.duplicates.insert(group);
        }

        // Field-level conflicts; a rejected pairing is no longer a pairing
        let mut conflicts = identify_conflicts(
            state
                .matches
                .iter()
                .filter(|m| m.status != MatchStatus::Unmatched),
        );
        if self.config.conflicts.skip_resolved {
            let settled: HashSet<(String, &'static str)> = state
                .conflicts
                .iter()
                .map(|c| (c.match_id.clone(), c.conflict_type.as_str()))
                .collect();
            conflicts.retain(|c| !settled.contains(&(c.match_id.clone(), c.conflict_type.as_str())));
        }
        info!(conflicts = conflicts.len(), "conflict detection complete");
        for conflict in conflicts {
            state.conflicts.insert(conflict);
        }

        self.categorize_unmatched(&state.matches, bank_transactions)
            .await;

        self.write(state.encode_all()).await;

        let summary = summarize(state, bank_transactions, app_transactions);
        info!(%summary, "reconciliation complete");
        state.last_summary = Some(summary.clone());

        summary
    }

    /// Ask the classifier about every bank transaction no match record claims.
    ///
    /// Calls are sequential and bounded by the classifier timeout; a failure
    /// or timeout only skips that transaction.
    async fn categorize_unmatched(
        &self,
        matches: &RecordBook<ReconciliationMatch>,
        bank_transactions: &mut [BankTransaction],
    ) {
        let claimed: HashSet<String> = matches
            .iter()
            .filter_map(|m| m.bank_id().map(str::to_string))
            .collect();
        let timeout = self.config.classifier.timeout();
        let mut applied = 0usize;

        for tx in bank_transactions.iter_mut() {
            if claimed.contains(&tx.id) || tx.category.is_some() {
                continue;
            }

            let suggestions =
                match tokio::time::timeout(timeout, self.classifier.classify(tx)).await {
                    Ok(Ok(suggestions)) => suggestions,
                    Ok(Err(e)) => {
                        warn!(transaction_id = %tx.id, error = %e, "classification failed, skipping");
                        continue;
                    }
                    Err(_) => {
                        warn!(
                            transaction_id = %tx.id,
                            timeout_ms = self.config.classifier.timeout_ms,
                            "classification timed out, skipping"
                        );
                        continue;
                    }
                };

            if let Some(top) = suggestions.into_iter().next() {
                if top.confidence >= self.config.classifier.min_confidence {
                    debug!(
                        transaction_id = %tx.id,
                        category = %top.category,
                        confidence = top.confidence,
                        "categorized unmatched bank transaction"
                    );
                    tx.category = Some(top.category);
                    applied += 1;
                }
            }
        }

        info!(applied, "auto-categorization complete");
    }

    /// Best-effort write on the blocking pool.
    ///
    /// Callers keep the state lock held across the write so collections land
    /// in the order they were changed.
    async fn write<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (&'static str, serde_json::Value)>,
    {
        let entries: Vec<_> = entries.into_iter().collect();
        let store = Arc::clone(&self.store);

        let outcome = tokio::task::spawn_blocking(move || {
            for (key, value) in &entries {
                if let Err(e) = store.save(key, value) {
                    warn!(key, error = %e, "failed to persist reconciliation state");
                }
            }
        })
        .await;

        if let Err(e) = outcome {
            warn!(error = %e, "store write task failed");
        }
    }

    // ========================================================================
    // READ ACCESSORS
    // ========================================================================

    pub async fn matches(&self) -> Vec<ReconciliationMatch> {
        self.state.lock().await.matches.records().to_vec()
    }

    pub async fn conflicts(&self) -> Vec<ReconciliationConflict> {
        self.state.lock().await.conflicts.records().to_vec()
    }

    pub async fn duplicate_groups(&self) -> Vec<DuplicateGroup> {
        self.state.lock().await.duplicates.records().to_vec()
    }

    /// Summary of the most recent run in this session
    pub async fn summary(&self) -> Option<ReconciliationSummary> {
        self.state.lock().await.last_summary.clone()
    }

    // ========================================================================
    // MANUAL REVIEW
    // ========================================================================

    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: ConflictResolution,
    ) -> Result<ReconciliationConflict> {
        let mut state = self.state.lock().await;

        let conflict = state
            .conflicts
            .get_mut(conflict_id)
            .ok_or_else(|| ReconError::NotFound(format!("conflict {}", conflict_id)))?;
        conflict.resolution = Some(resolution);
        conflict.resolved_at = Some(Utc::now());
        let resolved = conflict.clone();

        info!(conflict_id, resolution = ?resolution, "conflict resolved");
        self.write(encode(CONFLICTS_KEY, state.conflicts.records())).await;

        Ok(resolved)
    }

    pub async fn resolve_duplicate(
        &self,
        group_id: &str,
        resolution: DuplicateAction,
    ) -> Result<DuplicateGroup> {
        let mut state = self.state.lock().await;

        let group = state
            .duplicates
            .get_mut(group_id)
            .ok_or_else(|| ReconError::NotFound(format!("duplicate group {}", group_id)))?;
        group.resolution = Some(resolution);
        group.resolved_at = Some(Utc::now());
        let resolved = group.clone();

        info!(group_id, resolution = ?resolution, "duplicate group resolved");
        self.write(encode(DUPLICATES_KEY, state.duplicates.records())).await;

        Ok(resolved)
    }

    /// Confirm or reject a match. Either way it becomes sticky.
    ///
    /// Accepting a pairing the automatic passes did not accept turns it into
    /// a manual match.
    pub async fn review_match(
        &self,
        match_id: &str,
        reviewer: &str,
        accept: bool,
    ) -> Result<ReconciliationMatch> {
        let mut state = self.state.lock().await;

        let record = state
            .matches
            .get_mut(match_id)
            .ok_or_else(|| ReconError::NotFound(format!("match {}", match_id)))?;

        if accept {
            if record.sides().is_none() {
                return Err(ReconError::InvalidInput(format!(
                    "match {} has only one side and cannot be accepted",
                    match_id
                )));
            }
            if record.status != MatchStatus::Matched {
                record.match_type = MatchType::Manual;
                record.status = MatchStatus::Matched;
            }
        } else {
            record.status = MatchStatus::Unmatched;
        }
        record.reviewed_at = Some(Utc::now());
        record.reviewed_by = Some(reviewer.to_string());
        let reviewed = record.clone();

        if !accept {
            let rejected = HashSet::from([reviewed.id.clone()]);
            state.forget_derived(&rejected, true);
        }

        info!(match_id, reviewer, accept, "match reviewed");
        self.write(state.encode_all()).await;

        Ok(reviewed)
    }

    /// Pair two transactions by hand.
    ///
    /// Unreviewed records touching either transaction are dropped together
    /// with their conflicts and groups; a reviewed record touching either
    /// one is an error.
    pub async fn create_manual_match(
        &self,
        bank: &BankTransaction,
        app: &AppTransaction,
        reviewer: &str,
    ) -> Result<ReconciliationMatch> {
        let mut state = self.state.lock().await;

        let touches = |m: &ReconciliationMatch| {
            m.bank_id() == Some(bank.id.as_str()) || m.app_id() == Some(app.id.as_str())
        };

        if let Some(existing) = state.matches.iter().find(|m| m.is_reviewed() && touches(*m)) {
            return Err(ReconError::InvalidInput(format!(
                "transaction already settled by reviewed match {}",
                existing.record_id()
            )));
        }
        let replaced: HashSet<String> = state
            .matches
            .iter()
            .filter(|m| touches(*m))
            .map(|m| m.id.clone())
            .collect();
        state.matches.retain(|m| !touches(m));
        state.forget_derived(&replaced, false);

        let mut record = ReconciliationMatch::paired(
            bank,
            app,
            MatchType::Manual,
            1.0,
            vec!["manual match".to_string()],
            MatchStatus::Matched,
        );
        record.reviewed_at = Some(record.created_at);
        record.reviewed_by = Some(reviewer.to_string());

        info!(match_id = %record.id, bank_id = %bank.id, app_id = %app.id, reviewer, "manual match created");
        state.matches.insert(record.clone());
        self.write(state.encode_all()).await;

        Ok(record)
    }
}

/// Counts over the current state for this batch
fn summarize(
    state: &EngineState,
    bank_transactions: &[BankTransaction],
    app_transactions: &[AppTransaction],
) -> ReconciliationSummary {
    let matched_bank_ids: HashSet<&str> = state
        .matches
        .iter()
        .filter(|m| m.status == MatchStatus::Matched)
        .filter_map(|m| m.bank_id())
        .collect();

    let total = bank_transactions.len();
    let matched = bank_transactions
        .iter()
        .filter(|tx| matched_bank_ids.contains(tx.id.as_str()))
        .count();

    ReconciliationSummary {
        total_bank_transactions: total,
        total_app_transactions: app_transactions.len(),
        matched,
        unmatched: total - matched,
        conflicts: state.conflicts.iter().filter(|c| !c.is_resolved()).count(),
        duplicates: state.duplicates.iter().filter(|g| !g.is_resolved()).count(),
        accuracy: if total > 0 {
            matched as f64 / total as f64
        } else {
            0.0
        },
        last_reconciliation: Utc::now(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{CategoryRule, CategorySuggestion, NoopClassifier, RuleClassifier};
    use crate::models::{BankTransactionStatus, ConflictType, DuplicateType, TransactionType};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use std::time::Duration;

    fn at(day: u32, hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, min, sec).unwrap()
    }

    fn bank_tx(id: &str, amount: f64, date: DateTime<Utc>, description: &str) -> BankTransaction {
        BankTransaction {
            id: id.to_string(),
            account_id: "acc-1".to_string(),
            amount,
            currency: "BRL".to_string(),
            description: description.to_string(),
            date,
            transaction_type: TransactionType::Debit,
            merchant_name: None,
            category: None,
            reference: None,
            status: BankTransactionStatus::Posted,
        }
    }

    fn app_tx(id: &str, amount: f64, date: DateTime<Utc>, description: &str) -> AppTransaction {
        AppTransaction {
            id: id.to_string(),
            amount,
            date,
            description: description.to_string(),
            category: None,
            transaction_type: TransactionType::Debit,
            merchant_name: None,
            reference: None,
        }
    }

    fn engine_with(
        store: Arc<dyn ReconciliationStore>,
        classifier: Arc<dyn CategoryClassifier>,
    ) -> ReconciliationEngine {
        ReconciliationEngine::open(ReconciliationConfig::default(), store, classifier).unwrap()
    }

    fn engine() -> ReconciliationEngine {
        engine_with(Arc::new(MemoryStore::new()), Arc::new(NoopClassifier))
    }

    /// b1/a1 exact, b2/a2 fuzzy review band, b3+b4 bank duplicates, b5 unmatched
    fn batch() -> (Vec<BankTransaction>, Vec<AppTransaction>) {
        let bank = vec![
            bank_tx("b1", 100.0, at(10, 12, 0, 0), "Posto Shell"),
            bank_tx("b2", 100.0, at(12, 12, 0, 0), "Mercado Central"),
            bank_tx("b3", 50.0, at(5, 10, 0, 0), "Cafe X"),
            bank_tx("b4", 50.0, at(5, 10, 0, 30), "Cafe X"),
            bank_tx("b5", 900.0, at(1, 9, 0, 0), "Uber trip"),
        ];
        let app = vec![
            app_tx("a1", 100.0, at(10, 12, 0, 0), "Posto Shell"),
            app_tx("a2", 101.5, at(13, 12, 0, 0), "Mercado Central"),
        ];
        (bank, app)
    }

    #[tokio::test]
    async fn test_empty_bank_batch() {
        let engine = engine();
        let app = vec![app_tx("a1", 100.0, at(10, 12, 0, 0), "Posto Shell")];

        let summary = engine.reconcile(&mut [], &app).await;

        assert_eq!(summary.total_bank_transactions, 0);
        assert_eq!(summary.total_app_transactions, 1);
        assert_eq!(summary.matched, 0);
        assert_eq!(summary.accuracy, 0.0);
        assert!(engine.matches().await.is_empty());
        assert!(engine.conflicts().await.is_empty());
    }

    #[tokio::test]
    async fn test_full_run() {
        let engine = engine();
        let (mut bank, app) = batch();

        let summary = engine.reconcile(&mut bank, &app).await;

        let matches = engine.matches().await;
        assert_eq!(matches.len(), 2);
        let exact = matches.iter().find(|m| m.bank_id() == Some("b1")).unwrap();
        assert_eq!(exact.match_type, MatchType::Exact);
        assert_eq!(exact.status, MatchStatus::Matched);
        let fuzzy = matches.iter().find(|m| m.bank_id() == Some("b2")).unwrap();
        assert_eq!(fuzzy.match_type, MatchType::Fuzzy);
        assert_eq!(fuzzy.status, MatchStatus::Conflict);

        // Bank duplicates + the weak fuzzy match as a potential duplicate
        let groups = engine.duplicate_groups().await;
        assert_eq!(groups.len(), 2);
        assert!(groups
            .iter()
            .any(|g| g.duplicate_type == DuplicateType::Exact && g.contains("b3")));
        assert!(groups
            .iter()
            .any(|g| g.duplicate_type == DuplicateType::Potential
                && g.match_id.as_deref() == Some(fuzzy.id.as_str())));

        // The fuzzy pair disagrees on amount (1.50); dates are one day apart
        let conflicts = engine.conflicts().await;
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::Amount);
        assert_eq!(conflicts[0].match_id, fuzzy.id);

        assert_eq!(summary.total_bank_transactions, 5);
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.unmatched, 4);
        assert_eq!(summary.matched + summary.unmatched, summary.total_bank_transactions);
        assert_eq!(summary.conflicts, 1);
        assert_eq!(summary.duplicates, 2);
        assert!((summary.accuracy - 0.2).abs() < 1e-9);
        assert_eq!(engine.summary().await, Some(summary));
    }

    #[tokio::test]
    async fn test_rerun_recomputes_unreviewed_and_keeps_reviewed() {
        let engine = engine();
        let (mut bank, app) = batch();

        engine.reconcile(&mut bank, &app).await;
        let first = engine.matches().await;
        let exact_id = first.iter().find(|m| m.bank_id() == Some("b1")).unwrap().id.clone();
        let fuzzy_id = first.iter().find(|m| m.bank_id() == Some("b2")).unwrap().id.clone();

        let reviewed = engine.review_match(&fuzzy_id, "ana", true).await.unwrap();
        assert_eq!(reviewed.status, MatchStatus::Matched);
        assert_eq!(reviewed.match_type, MatchType::Manual);

        let summary = engine.reconcile(&mut bank, &app).await;
        let second = engine.matches().await;

        assert_eq!(second.len(), 2);
        assert!(second.iter().any(|m| m == &reviewed));
        // The exact match was recomputed under a fresh id
        assert!(second.iter().all(|m| m.id != exact_id));
        assert_eq!(summary.matched, 2);

        // A reviewed pairing is no longer a potential duplicate
        let groups = engine.duplicate_groups().await;
        assert!(groups.iter().all(|g| g.duplicate_type != DuplicateType::Potential));
    }

    #[tokio::test]
    async fn test_rejected_match_stays_unmatched() {
        let engine = engine();
        let (mut bank, app) = batch();

        engine.reconcile(&mut bank, &app).await;
        let exact_id = engine
            .matches()
            .await
            .into_iter()
            .find(|m| m.bank_id() == Some("b1"))
            .unwrap()
            .id;

        engine.review_match(&exact_id, "ana", false).await.unwrap();
        let summary = engine.reconcile(&mut bank, &app).await;

        let matches = engine.matches().await;
        let b1: Vec<_> = matches.iter().filter(|m| m.bank_id() == Some("b1")).collect();
        assert_eq!(b1.len(), 1);
        assert_eq!(b1[0].status, MatchStatus::Unmatched);
        assert_eq!(summary.matched, 0);
    }

    fn ids<T: Record>(records: &[T]) -> Vec<String> {
        records.iter().map(|r| r.record_id().to_string()).collect()
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let store: Arc<dyn ReconciliationStore> = Arc::new(MemoryStore::new());
        let (mut bank, app) = batch();

        let first = engine_with(store.clone(), Arc::new(NoopClassifier));
        first.reconcile(&mut bank, &app).await;
        let matches = first.matches().await;
        let conflicts = first.conflicts().await;
        let groups = first.duplicate_groups().await;

        let reopened = engine_with(store, Arc::new(NoopClassifier));

        assert!(!matches.is_empty());
        assert_eq!(ids(&reopened.matches().await), ids(&matches));
        assert_eq!(ids(&reopened.conflicts().await), ids(&conflicts));
        assert_eq!(ids(&reopened.duplicate_groups().await), ids(&groups));
        assert!(reopened.summary().await.is_none());
    }

    struct BrokenStore;

    impl ReconciliationStore for BrokenStore {
        fn load(&self, _key: &str) -> anyhow::Result<Option<serde_json::Value>> {
            Ok(None)
        }

        fn save(&self, _key: &str, _value: &serde_json::Value) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("disk full"))
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_still_returns_summary() {
        let engine = engine_with(Arc::new(BrokenStore), Arc::new(NoopClassifier));
        let (mut bank, app) = batch();

        let summary = engine.reconcile(&mut bank, &app).await;

        assert_eq!(summary.matched, 1);
        assert_eq!(engine.matches().await.len(), 2);
    }

    /// Fails for "Uber", hangs for "Cafe", answers everything else
    struct FlakyClassifier;

    #[async_trait]
    impl CategoryClassifier for FlakyClassifier {
        async fn classify(
            &self,
            transaction: &BankTransaction,
        ) -> anyhow::Result<Vec<CategorySuggestion>> {
            if transaction.description.contains("Uber") {
                return Err(anyhow::anyhow!("model unavailable"));
            }
            if transaction.description.contains("Cafe") {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(vec![CategorySuggestion {
                category: "Outros".to_string(),
                confidence: 0.8,
                rule_id: None,
            }])
        }
    }

    #[tokio::test]
    async fn test_classifier_failures_are_isolated() {
        let mut config = ReconciliationConfig::default();
        config.classifier.timeout_ms = 50;
        let engine = ReconciliationEngine::open(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(FlakyClassifier),
        )
        .unwrap();

        let mut bank = vec![
            bank_tx("b1", 10.0, at(1, 9, 0, 0), "Uber trip"),
            bank_tx("b2", 20.0, at(2, 9, 0, 0), "Cafe Y"),
            bank_tx("b3", 30.0, at(3, 9, 0, 0), "Livraria"),
        ];

        let summary = engine.reconcile(&mut bank, &[]).await;

        assert_eq!(summary.unmatched, 3);
        assert_eq!(bank[0].category, None);
        assert_eq!(bank[1].category, None);
        assert_eq!(bank[2].category.as_deref(), Some("Outros"));
    }

    #[tokio::test]
    async fn test_only_confident_unmatched_transactions_are_categorized() {
        let classifier = RuleClassifier::from_rules(vec![
            CategoryRule {
                id: "fuel".to_string(),
                pattern: "posto*".to_string(),
                category: "Combustivel".to_string(),
                confidence: 0.95,
                priority: 10,
            },
            CategoryRule {
                id: "guess".to_string(),
                pattern: "uber".to_string(),
                category: "Transporte".to_string(),
                confidence: 0.5,
                priority: 1,
            },
        ]);
        let engine = engine_with(Arc::new(MemoryStore::new()), Arc::new(classifier));

        let mut bank = vec![
            bank_tx("b1", 100.0, at(10, 12, 0, 0), "Posto Shell"),
            bank_tx("b2", 80.0, at(11, 12, 0, 0), "Posto Ipiranga"),
            bank_tx("b3", 25.0, at(11, 18, 0, 0), "Uber trip"),
        ];
        let app = vec![app_tx("a1", 100.0, at(10, 12, 0, 0), "Posto Shell")];

        engine.reconcile(&mut bank, &app).await;

        // b1 is matched and left alone
        assert_eq!(bank[0].category, None);
        assert_eq!(bank[1].category.as_deref(), Some("Combustivel"));
        // 0.5 is below the 0.7 bar
        assert_eq!(bank[2].category, None);
    }

    #[tokio::test]
    async fn test_resolve_conflict_and_duplicate() {
        let engine = engine();
        let (mut bank, app) = batch();
        engine.reconcile(&mut bank, &app).await;

        let conflict_id = engine.conflicts().await[0].id.clone();
        let resolved = engine
            .resolve_conflict(&conflict_id, ConflictResolution::UseBank)
            .await
            .unwrap();
        assert_eq!(resolved.resolution, Some(ConflictResolution::UseBank));
        assert!(resolved.resolved_at.is_some());

        let group_id = engine.duplicate_groups().await[0].id.clone();
        let resolved = engine
            .resolve_duplicate(&group_id, DuplicateAction::KeepAll)
            .await
            .unwrap();
        assert_eq!(resolved.resolution, Some(DuplicateAction::KeepAll));

        // Resolved records survive the next run
        engine.reconcile(&mut bank, &app).await;
        assert!(engine.conflicts().await.iter().any(|c| c.id == conflict_id));
        assert!(engine.duplicate_groups().await.iter().any(|g| g.id == group_id));

        assert!(matches!(
            engine.resolve_conflict("missing", ConflictResolution::Ignore).await,
            Err(ReconError::NotFound(_))
        ));
        assert!(matches!(
            engine.resolve_duplicate("missing", DuplicateAction::Merge).await,
            Err(ReconError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_skip_resolved_conflicts() {
        let mut config = ReconciliationConfig::default();
        config.conflicts.skip_resolved = true;
        let engine = ReconciliationEngine::open(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(NoopClassifier),
        )
        .unwrap();

        let mut bank = vec![bank_tx("b1", 200.0, at(1, 9, 0, 0), "Loja")];
        let app = vec![app_tx("a1", 180.0, at(1, 9, 0, 0), "Loja")];
        engine.reconcile(&mut bank, &app).await;

        // Manual pairing is sticky, so its id is stable across runs
        let manual = engine
            .create_manual_match(&bank[0], &app[0], "ana")
            .await
            .unwrap();
        engine.reconcile(&mut bank, &app).await;
        let conflict = engine
            .conflicts()
            .await
            .into_iter()
            .find(|c| c.match_id == manual.id)
            .unwrap();
        engine
            .resolve_conflict(&conflict.id, ConflictResolution::UseApp)
            .await
            .unwrap();

        let summary = engine.reconcile(&mut bank, &app).await;

        let for_manual: Vec<_> = engine
            .conflicts()
            .await
            .into_iter()
            .filter(|c| c.match_id == manual.id)
            .collect();
        assert_eq!(for_manual.len(), 1);
        assert!(for_manual[0].is_resolved());
        assert_eq!(summary.conflicts, 0);
    }

    fn fuzzy_match_id(matches: &[ReconciliationMatch]) -> String {
        matches
            .iter()
            .find(|m| m.bank_id() == Some("b2"))
            .unwrap()
            .id
            .clone()
    }

    #[tokio::test]
    async fn test_resolved_conflict_follows_rebuilt_match() {
        let engine = engine();
        let (mut bank, app) = batch();
        engine.reconcile(&mut bank, &app).await;

        let conflict_id = engine.conflicts().await[0].id.clone();
        engine
            .resolve_conflict(&conflict_id, ConflictResolution::UseBank)
            .await
            .unwrap();
        engine.reconcile(&mut bank, &app).await;
        let summary = engine.reconcile(&mut bank, &app).await;

        let matches = engine.matches().await;
        let conflicts = engine.conflicts().await;
        let match_ids: HashSet<&str> = matches.iter().map(|m| m.id.as_str()).collect();

        assert!(conflicts
            .iter()
            .all(|c| match_ids.contains(c.match_id.as_str())));
        let resolved = conflicts.iter().find(|c| c.id == conflict_id).unwrap();
        assert_eq!(resolved.match_id, fuzzy_match_id(&matches));

        // The resolved record plus the field raised again; no growth per run
        assert_eq!(conflicts.len(), 2);
        assert_eq!(summary.conflicts, 1);

        let groups = engine.duplicate_groups().await;
        assert!(groups
            .iter()
            .filter_map(|g| g.match_id.as_deref())
            .all(|id| match_ids.contains(id)));
    }

    #[tokio::test]
    async fn test_skip_resolved_applies_to_rebuilt_matches() {
        let mut config = ReconciliationConfig::default();
        config.conflicts.skip_resolved = true;
        let engine = ReconciliationEngine::open(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(NoopClassifier),
        )
        .unwrap();
        let (mut bank, app) = batch();
        engine.reconcile(&mut bank, &app).await;

        let conflict_id = engine.conflicts().await[0].id.clone();
        engine
            .resolve_conflict(&conflict_id, ConflictResolution::UseBank)
            .await
            .unwrap();
        engine.reconcile(&mut bank, &app).await;
        let summary = engine.reconcile(&mut bank, &app).await;

        let conflicts = engine.conflicts().await;
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].id, conflict_id);
        assert_eq!(summary.conflicts, 0);
    }

    #[tokio::test]
    async fn test_resolved_duplicate_group_is_not_raised_again() {
        let engine = engine();
        let (mut bank, app) = batch();
        let first = engine.reconcile(&mut bank, &app).await;
        assert_eq!(first.duplicates, 2);

        let bank_group = engine
            .duplicate_groups()
            .await
            .into_iter()
            .find(|g| g.contains("b3"))
            .unwrap();
        engine
            .resolve_duplicate(&bank_group.id, DuplicateAction::KeepBank)
            .await
            .unwrap();

        let summary = engine.reconcile(&mut bank, &app).await;
        let groups = engine.duplicate_groups().await;
        assert_eq!(groups.iter().filter(|g| g.contains("b3")).count(), 1);
        assert_eq!(groups.len(), 2);
        assert_eq!(summary.duplicates, 1);

        // Settling the potential duplicate sticks as well, following the rebuilt match
        let potential = groups
            .iter()
            .find(|g| g.duplicate_type == DuplicateType::Potential)
            .unwrap();
        engine
            .resolve_duplicate(&potential.id, DuplicateAction::KeepAll)
            .await
            .unwrap();

        let summary = engine.reconcile(&mut bank, &app).await;
        let groups = engine.duplicate_groups().await;
        assert_eq!(groups.len(), 2);
        assert_eq!(summary.duplicates, 0);
        let relinked = groups.iter().find(|g| g.id == potential.id).unwrap();
        assert_eq!(
            relinked.match_id.as_deref(),
            Some(fuzzy_match_id(&engine.matches().await).as_str())
        );
    }

    #[tokio::test]
    async fn test_rejecting_match_clears_its_open_records() {
        let engine = engine();
        let (mut bank, app) = batch();
        engine.reconcile(&mut bank, &app).await;
        let fuzzy_id = fuzzy_match_id(&engine.matches().await);

        engine.review_match(&fuzzy_id, "ana", false).await.unwrap();

        assert!(engine
            .conflicts()
            .await
            .iter()
            .all(|c| c.match_id != fuzzy_id));
        assert!(engine
            .duplicate_groups()
            .await
            .iter()
            .all(|g| g.match_id.as_deref() != Some(fuzzy_id.as_str())));
    }

    #[tokio::test]
    async fn test_manual_match_replaces_records_of_dropped_match() {
        let engine = engine();
        let (mut bank, app) = batch();
        engine.reconcile(&mut bank, &app).await;
        let fuzzy_id = fuzzy_match_id(&engine.matches().await);
        let conflict_id = engine.conflicts().await[0].id.clone();
        engine
            .resolve_conflict(&conflict_id, ConflictResolution::UseApp)
            .await
            .unwrap();

        let manual = engine
            .create_manual_match(&bank[1], &app[1], "ana")
            .await
            .unwrap();

        let matches = engine.matches().await;
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.id != fuzzy_id));
        assert!(matches.iter().any(|m| m.id == manual.id));
        assert!(engine.conflicts().await.is_empty());
        assert!(engine
            .duplicate_groups()
            .await
            .iter()
            .all(|g| g.duplicate_type != DuplicateType::Potential));
    }

    #[tokio::test]
    async fn test_manual_match() {
        let engine = engine();
        let mut bank = vec![bank_tx("b1", 200.0, at(1, 9, 0, 0), "Transferencia")];
        let app = vec![
            app_tx("a1", 150.0, at(6, 9, 0, 0), "Aluguel"),
            app_tx("a2", 200.0, at(1, 9, 0, 0), "Outra"),
        ];

        let manual = engine
            .create_manual_match(&bank[0], &app[0], "ana")
            .await
            .unwrap();
        assert_eq!(manual.match_type, MatchType::Manual);
        assert_eq!(manual.confidence, 1.0);
        assert_eq!(manual.reviewed_by.as_deref(), Some("ana"));

        let summary = engine.reconcile(&mut bank, &app).await;

        let matches = engine.matches().await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, manual.id);
        assert_eq!(summary.matched, 1);

        // b1 is settled by a reviewed match
        assert!(matches!(
            engine.create_manual_match(&bank[0], &app[1], "ana").await,
            Err(ReconError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_review_unknown_match() {
        let engine = engine();

        assert!(matches!(
            engine.review_match("missing", "ana", true).await,
            Err(ReconError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_no_transaction_matched_twice() {
        let engine = engine();
        let mut bank: Vec<_> = (0..6)
            .map(|i| bank_tx(&format!("b{}", i), 40.0, at(10 + i % 2, 12, 0, 0), "Farmacia Popular"))
            .collect();
        let app: Vec<_> = (0..4)
            .map(|i| app_tx(&format!("a{}", i), 40.0 + i as f64 * 0.3, at(10, 12, 0, 0), "Farmacia Popular"))
            .collect();

        let summary = engine.reconcile(&mut bank, &app).await;
        let matches = engine.matches().await;

        let accepted: Vec<_> = matches
            .iter()
            .filter(|m| m.status == MatchStatus::Matched)
            .collect();
        let bank_ids: HashSet<_> = accepted.iter().filter_map(|m| m.bank_id()).collect();
        let app_ids: HashSet<_> = accepted.iter().filter_map(|m| m.app_id()).collect();
        assert_eq!(bank_ids.len(), accepted.len());
        assert_eq!(app_ids.len(), accepted.len());
        assert!(matches.len() <= app.len());
        assert_eq!(summary.matched + summary.unmatched, bank.len());
    }
}
