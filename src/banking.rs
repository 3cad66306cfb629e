// 🏦 Banking Collaborator - where bank transactions come from
//
// The OAuth connection flow lives elsewhere; this is only the read side the
// engine's callers need: which connections exist and what each account reported.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::BankTransaction;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankConnection {
    pub id: String,
    pub provider_id: String,
    pub account_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait BankingProvider: Send + Sync {
    async fn list_providers(&self) -> Result<Vec<Provider>>;
    async fn list_connections(&self) -> Result<Vec<BankConnection>>;
    async fn fetch_transactions(
        &self,
        account_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<BankTransaction>>;
}

/// Fetch every connected account, one account at a time, into one batch.
///
/// A failing account is logged and skipped; failing to list connections is
/// an error.
pub async fn collect_transactions(
    provider: &dyn BankingProvider,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<BankTransaction>> {
    let connections = provider.list_connections().await?;
    let mut transactions = Vec::new();

    for connection in &connections {
        for account_id in &connection.account_ids {
            match provider.fetch_transactions(account_id, since).await {
                Ok(batch) => {
                    info!(
                        connection_id = %connection.id,
                        account_id = %account_id,
                        count = batch.len(),
                        "fetched bank transactions"
                    );
                    transactions.extend(batch);
                }
                Err(e) => {
                    warn!(
                        connection_id = %connection.id,
                        account_id = %account_id,
                        error = %e,
                        "failed to fetch account transactions, skipping"
                    );
                }
            }
        }
    }

    Ok(transactions)
}
