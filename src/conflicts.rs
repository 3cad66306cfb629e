// ⚖️ Conflict Identifier - field-level disagreements inside a match
//
// Conflicts are field-scoped: one matched pair can produce an amount, a
// date and a category conflict at the same time.

use serde_json::json;

use crate::models::{
    date_diff_ms, ConflictType, ReconciliationConflict, ReconciliationMatch, SuggestedResolution,
    DAY_MS,
};
use crate::scoring::AMOUNT_EPSILON;

const AMOUNT_CONFIDENCE: f64 = 0.9;
const DATE_CONFIDENCE: f64 = 0.8;
const CATEGORY_CONFIDENCE: f64 = 0.6;

/// Conflicts for a single match. Empty unless both sides are present.
pub fn conflicts_for(record: &ReconciliationMatch) -> Vec<ReconciliationConflict> {
    let Some((bank, app)) = record.sides() else {
        return Vec::new();
    };

    let mut conflicts = Vec::new();

    // The bank feed is the source of truth for amount and date
    if (bank.amount - app.amount).abs() > AMOUNT_EPSILON {
        conflicts.push(ReconciliationConflict::new(
            &record.id,
            ConflictType::Amount,
            json!(bank.amount),
            json!(app.amount),
            SuggestedResolution::UseBank,
            AMOUNT_CONFIDENCE,
        ));
    }

    if date_diff_ms(&bank.date, &app.date) > DAY_MS {
        conflicts.push(ReconciliationConflict::new(
            &record.id,
            ConflictType::Date,
            json!(bank.date.to_rfc3339()),
            json!(app.date.to_rfc3339()),
            SuggestedResolution::UseBank,
            DATE_CONFIDENCE,
        ));
    }

    if let (Some(bank_category), Some(app_category)) = (&bank.category, &app.category) {
        if bank_category != app_category {
            conflicts.push(ReconciliationConflict::new(
                &record.id,
                ConflictType::Category,
                json!(bank_category),
                json!(app_category),
                SuggestedResolution::ManualReview,
                CATEGORY_CONFIDENCE,
            ));
        }
    }

    conflicts
}

/// Conflicts for every two-sided match, in match order
pub fn identify_conflicts<'a, I>(matches: I) -> Vec<ReconciliationConflict>
where
    I: IntoIterator<Item = &'a ReconciliationMatch>,
{
    matches.into_iter().flat_map(conflicts_for).collect()
}
