//! Validates, dedups and appends fetched records to the staging area.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::Result;
use crate::retry::RetryPolicy;
use crate::transactions::{
    CompactionScope, KeyQuality, SourceTransaction, Transaction, TransactionRepositoryTrait,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LandOutcome {
    pub received: usize,
    /// Records dropped by validation.
    pub invalid: usize,
    /// Duplicates collapsed within the batch.
    pub collapsed: usize,
    /// Records whose key is already landed at the same or a newer version.
    pub already_landed: usize,
    pub staged: usize,
    /// Staged records whose key was not landed before.
    pub new_records: usize,
    /// Staged records replacing an older landed version.
    pub superseding: usize,
    pub fallback_keys: usize,
    /// Production rows written directly when staging is disabled.
    pub rows_merged: usize,
    #[serde(skip)]
    pub instrument_ids: HashSet<String>,
}

#[derive(Clone)]
pub struct StagingLander {
    transactions: Arc<dyn TransactionRepositoryTrait>,
    retry: RetryPolicy,
    use_staging: bool,
}

impl StagingLander {
    pub fn new(
        transactions: Arc<dyn TransactionRepositoryTrait>,
        retry: RetryPolicy,
        use_staging: bool,
    ) -> Self {
        Self {
            transactions,
            retry,
            use_staging,
        }
    }

    /// Lands one batch fetched for `account_id`.
    ///
    /// With staging enabled this only appends to the staging area. With
    /// staging disabled the batch is merged into production right away.
    pub async fn land(
        &self,
        account_id: &str,
        batch: Vec<SourceTransaction>,
    ) -> Result<LandOutcome> {
        let mut outcome = LandOutcome {
            received: batch.len(),
            ..LandOutcome::default()
        };

        let mut by_key: HashMap<String, Transaction> = HashMap::with_capacity(batch.len());
        for source in batch {
            let transaction = match Transaction::from_source(source, account_id) {
                Ok(transaction) => transaction,
                Err(err) => {
                    debug!("Dropping record for {}: {}", account_id, err);
                    outcome.invalid += 1;
                    continue;
                }
            };
            if transaction.key_quality == KeyQuality::Fallback {
                outcome.fallback_keys += 1;
                warn!(
                    "fallback idempotency key for account {} record {} at {}",
                    account_id, transaction.external_id, transaction.occurred_at
                );
            }
            if let Some(instrument_id) = &transaction.instrument_id {
                outcome.instrument_ids.insert(instrument_id.clone());
            }

            let replace = match by_key.get(&transaction.idempotency_key) {
                Some(existing) => {
                    outcome.collapsed += 1;
                    transaction.supersedes(existing)
                }
                None => true,
            };
            if replace {
                by_key.insert(transaction.idempotency_key.clone(), transaction);
            }
        }

        if by_key.is_empty() {
            return Ok(outcome);
        }

        let keys: Vec<String> = by_key.keys().cloned().collect();
        let landed = self
            .retry
            .run("Landed version lookup", || {
                let transactions = Arc::clone(&self.transactions);
                let keys = keys.clone();
                async move { transactions.landed_versions(&keys) }
            })
            .await?;

        let mut survivors = Vec::with_capacity(by_key.len());
        for (key, transaction) in by_key {
            match landed.get(&key) {
                None => {
                    outcome.new_records += 1;
                    survivors.push(transaction);
                }
                Some(version) if version.is_superseded_by(&transaction) => {
                    outcome.superseding += 1;
                    survivors.push(transaction);
                }
                Some(_) => outcome.already_landed += 1,
            }
        }

        if survivors.is_empty() {
            debug!(
                "Nothing new to land for {} ({} already landed)",
                account_id, outcome.already_landed
            );
            return Ok(outcome);
        }

        survivors.sort_by(|a, b| {
            (a.occurred_at, &a.idempotency_key).cmp(&(b.occurred_at, &b.idempotency_key))
        });
        let batch_id = Uuid::now_v7().to_string();
        outcome.staged = self
            .retry
            .run("Staging append", || {
                let transactions = Arc::clone(&self.transactions);
                let rows = survivors.clone();
                let batch_id = batch_id.clone();
                async move { transactions.append_staging(batch_id, rows).await }
            })
            .await?;

        if !self.use_staging {
            let merged = self
                .retry
                .run("Direct merge", || {
                    let transactions = Arc::clone(&self.transactions);
                    let scope = CompactionScope::Batch(batch_id.clone());
                    async move { transactions.merge_staging(scope).await }
                })
                .await?;
            outcome.rows_merged = merged.rows_merged;
        }

        debug!(
            "Landed {} records for {} ({} new, {} superseding, {} invalid, {} collapsed)",
            outcome.staged,
            account_id,
            outcome.new_records,
            outcome.superseding,
            outcome.invalid,
            outcome.collapsed
        );
        Ok(outcome)
    }
}
