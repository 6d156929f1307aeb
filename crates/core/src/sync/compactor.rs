//! Merges staged rows into the partitioned production table.

use std::sync::Arc;

use log::info;

use crate::errors::Result;
use crate::retry::RetryPolicy;
use crate::transactions::{CompactionScope, MergeOutcome, TransactionRepositoryTrait};

#[derive(Clone)]
pub struct Compactor {
    transactions: Arc<dyn TransactionRepositoryTrait>,
    retry: RetryPolicy,
}

impl Compactor {
    pub fn new(transactions: Arc<dyn TransactionRepositoryTrait>, retry: RetryPolicy) -> Self {
        Self {
            transactions,
            retry,
        }
    }

    /// Dedups the scoped staging rows (latest timestamp, then greatest
    /// external id) and upsert-merges them into production.
    ///
    /// Quota refusals are retried with backoff and surface once the retries
    /// are spent.
    pub async fn compact(&self, scope: CompactionScope) -> Result<MergeOutcome> {
        let outcome = self
            .retry
            .run("Compaction", || {
                let transactions = Arc::clone(&self.transactions);
                let scope = scope.clone();
                async move { transactions.merge_staging(scope).await }
            })
            .await?;
        info!(
            "Compacted {:?}: {} staged rows, {} merged, {} partitions touched",
            scope, outcome.staged_rows, outcome.rows_merged, outcome.partitions_touched
        );
        Ok(outcome)
    }

    pub fn staging_row_count(&self) -> Result<i64> {
        self.transactions.staging_row_count()
    }
}
