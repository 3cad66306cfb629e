// 🎯 Match Scorer - weighted evidence that a bank and an app transaction
// describe the same real-world event.
//
// Two scorers:
//   exact  - near-perfect agreement (amount to the cent, same day, same text)
//   fuzzy  - tolerant agreement (small amount drift, a few days, partial text)
//
// Each triggered signal adds its weight and a human-readable reason.

use serde::{Deserialize, Serialize};

use crate::models::{date_diff_ms, AppTransaction, BankTransaction, DAY_MS};
use crate::similarity::similarity;

/// Two amounts closer than this are the same amount
pub const AMOUNT_EPSILON: f64 = 0.01;

// Exact weights (sum 1.00)
const EXACT_AMOUNT_WEIGHT: f64 = 0.40;
const EXACT_DATE_WEIGHT: f64 = 0.30;
const EXACT_DESCRIPTION_WEIGHT: f64 = 0.20;
const EXACT_REFERENCE_WEIGHT: f64 = 0.10;
const EXACT_DESCRIPTION_MIN: f64 = 0.80;

// Fuzzy weights (sum 1.05, clamped)
const FUZZY_AMOUNT_WEIGHT: f64 = 0.35;
const FUZZY_DATE_WEIGHT: f64 = 0.25;
const FUZZY_DESCRIPTION_WEIGHT: f64 = 0.20;
const FUZZY_MERCHANT_WEIGHT: f64 = 0.15;
const FUZZY_TYPE_WEIGHT: f64 = 0.05;
const FUZZY_AMOUNT_RATIO: f64 = 0.02;
const FUZZY_AMOUNT_FLOOR: f64 = 1.0;
const FUZZY_DATE_WINDOW_DAYS: f64 = 3.0;
const FUZZY_DESCRIPTION_MIN: f64 = 0.50;
const FUZZY_MERCHANT_MIN: f64 = 0.70;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchScore {
    /// Confidence in [0, 1]
    pub confidence: f64,

    /// One entry per triggered signal
    pub reasons: Vec<String>,
}

impl MatchScore {
    fn add(&mut self, weight: f64, reason: impl Into<String>) {
        self.confidence += weight;
        self.reasons.push(reason.into());
    }

    fn clamped(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Near-perfect agreement score.
///
/// References only count against a pair when both sides carry one and they
/// differ; a reference on one side only scores like none.
pub fn exact_score(bank: &BankTransaction, app: &AppTransaction) -> MatchScore {
    let mut score = MatchScore::default();

    if (bank.amount - app.amount).abs() < AMOUNT_EPSILON {
        score.add(EXACT_AMOUNT_WEIGHT, "exact amount");
    }

    if date_diff_ms(&bank.date, &app.date) <= DAY_MS {
        score.add(EXACT_DATE_WEIGHT, "compatible date");
    }

    if similarity(&bank.description, &app.description) >= EXACT_DESCRIPTION_MIN {
        score.add(EXACT_DESCRIPTION_WEIGHT, "similar description");
    }

    match (non_empty(&bank.reference), non_empty(&app.reference)) {
        (Some(a), Some(b)) if a == b => score.add(EXACT_REFERENCE_WEIGHT, "identical reference"),
        (Some(_), Some(_)) => {}
        _ => score.add(EXACT_REFERENCE_WEIGHT, "no conflicting reference"),
    }

    score.clamped()
}

/// Tolerant agreement score
pub fn fuzzy_score(bank: &BankTransaction, app: &AppTransaction) -> MatchScore {
    let mut score = MatchScore::default();

    let amount_diff = (bank.amount - app.amount).abs();
    let tolerance = (bank.amount.abs() * FUZZY_AMOUNT_RATIO).max(FUZZY_AMOUNT_FLOOR);
    if amount_diff <= tolerance {
        score.add(
            FUZZY_AMOUNT_WEIGHT,
            format!("amount within tolerance (difference {:.2})", amount_diff),
        );
    }

    let days = date_diff_ms(&bank.date, &app.date) as f64 / DAY_MS as f64;
    if days <= FUZZY_DATE_WINDOW_DAYS {
        score.add(
            FUZZY_DATE_WEIGHT * (1.0 - days / FUZZY_DATE_WINDOW_DAYS),
            format!("date {:.1} day(s) apart", days),
        );
    }

    let description = similarity(&bank.description, &app.description);
    if description >= FUZZY_DESCRIPTION_MIN {
        score.add(
            FUZZY_DESCRIPTION_WEIGHT * description,
            format!("description {:.0}% similar", description * 100.0),
        );
    }

    if let (Some(a), Some(b)) = (non_empty(&bank.merchant_name), non_empty(&app.merchant_name)) {
        if similarity(a, b) >= FUZZY_MERCHANT_MIN {
            score.add(FUZZY_MERCHANT_WEIGHT, "similar merchant");
        }
    }

    if bank.transaction_type == app.transaction_type {
        score.add(FUZZY_TYPE_WEIGHT, "same transaction type");
    }

    score.clamped()
}
