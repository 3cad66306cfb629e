// 📥 CSV Import - load bank and app transaction files
//
// Rows without an id get a stable fingerprint id (SHA-256 of the fields
// that identify the event), so re-importing the same file reuses the same
// ids and reviewed matches keep pointing at the right rows.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{ReconError, Result};
use crate::models::{AppTransaction, BankTransaction, BankTransactionStatus, TransactionType};

#[derive(Debug, Deserialize)]
struct BankRow {
    id: Option<String>,
    account_id: String,
    amount: f64,
    currency: Option<String>,
    description: String,
    date: String,
    #[serde(rename = "type")]
    transaction_type: Option<String>,
    merchant_name: Option<String>,
    category: Option<String>,
    reference: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AppRow {
    id: Option<String>,
    amount: f64,
    description: String,
    date: String,
    #[serde(rename = "type")]
    transaction_type: Option<String>,
    category: Option<String>,
    merchant_name: Option<String>,
    reference: Option<String>,
}

/// Parse RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD` or `MM/DD/YYYY` as UTC
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc());
    }

    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(dt.and_utc());
            }
        }
    }

    Err(ReconError::InvalidInput(format!("unparseable date: {:?}", raw)))
}

/// Stable id from the identifying fields of a row
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    format!("{:x}", hasher.finalize())
}

fn parse_type(raw: Option<&str>, amount: f64) -> Result<TransactionType> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) => value.parse(),
        None if amount < 0.0 => Ok(TransactionType::Debit),
        None => Ok(TransactionType::Credit),
    }
}

fn parse_status(raw: Option<&str>) -> Result<BankTransactionStatus> {
    match raw.map(|s| s.trim().to_lowercase()).as_deref() {
        None | Some("") | Some("posted") => Ok(BankTransactionStatus::Posted),
        Some("pending") => Ok(BankTransactionStatus::Pending),
        Some("cancelled") | Some("canceled") => Ok(BankTransactionStatus::Cancelled),
        Some(other) => Err(ReconError::InvalidInput(format!(
            "unknown bank transaction status: {}",
            other
        ))),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn row_error(line: usize, err: ReconError) -> ReconError {
    ReconError::InvalidInput(format!("row {}: {}", line, err))
}

pub fn read_bank_transactions<R: std::io::Read>(reader: R) -> Result<Vec<BankTransaction>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut transactions = Vec::new();

    for (line, result) in rdr.deserialize::<BankRow>().enumerate() {
        let row = result?;
        let date = parse_date(&row.date).map_err(|e| row_error(line + 1, e))?;
        let transaction_type = parse_type(row.transaction_type.as_deref(), row.amount)
            .map_err(|e| row_error(line + 1, e))?;
        let status = parse_status(row.status.as_deref()).map_err(|e| row_error(line + 1, e))?;

        let id = non_empty(row.id).unwrap_or_else(|| {
            fingerprint(&[
                "bank",
                &row.account_id,
                &row.date,
                &row.amount.to_string(),
                &row.description,
            ])
        });

        transactions.push(BankTransaction {
            id,
            account_id: row.account_id,
            amount: row.amount,
            currency: non_empty(row.currency).unwrap_or_else(|| "BRL".to_string()),
            description: row.description,
            date,
            transaction_type,
            merchant_name: non_empty(row.merchant_name),
            category: non_empty(row.category),
            reference: non_empty(row.reference),
            status,
        });
    }

    Ok(transactions)
}

pub fn read_app_transactions<R: std::io::Read>(reader: R) -> Result<Vec<AppTransaction>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut transactions = Vec::new();

    for (line, result) in rdr.deserialize::<AppRow>().enumerate() {
        let row = result?;
        let date = parse_date(&row.date).map_err(|e| row_error(line + 1, e))?;
        let transaction_type = parse_type(row.transaction_type.as_deref(), row.amount)
            .map_err(|e| row_error(line + 1, e))?;

        let id = non_empty(row.id).unwrap_or_else(|| {
            fingerprint(&["app", &row.date, &row.amount.to_string(), &row.description])
        });

        transactions.push(AppTransaction {
            id,
            amount: row.amount,
            date,
            description: row.description,
            category: non_empty(row.category),
            transaction_type,
            merchant_name: non_empty(row.merchant_name),
            reference: non_empty(row.reference),
        });
    }

    Ok(transactions)
}

pub fn load_bank_csv(path: &Path) -> Result<Vec<BankTransaction>> {
    read_bank_transactions(std::fs::File::open(path)?)
}

pub fn load_app_csv(path: &Path) -> Result<Vec<AppTransaction>> {
    read_app_transactions(std::fs::File::open(path)?)
}
