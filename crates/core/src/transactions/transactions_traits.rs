use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::transactions_model::{
    CompactionScope, LandedVersion, MergeOutcome, PageRequest, Transaction, TransactionPage,
};
use crate::errors::Result;

/// Paginated upstream read API for transactions.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<TransactionPage>;
}

/// Externally supplied list of accounts to ingest.
pub trait AccountDirectory: Send + Sync {
    fn list_accounts(&self) -> Result<Vec<String>>;
}

/// Destination store for transactions: the staging area and the
/// partitioned production table.
#[async_trait]
pub trait TransactionRepositoryTrait: Send + Sync {
    /// Newest landed version per key across production and staging.
    fn landed_versions(&self, keys: &[String]) -> Result<HashMap<String, LandedVersion>>;

    /// Distinct keys landed for an account across production and staging.
    fn count_account_rows(&self, account_id: &str) -> Result<i64>;

    fn max_landed_occurred_at(&self) -> Result<Option<DateTime<Utc>>>;

    fn staging_row_count(&self) -> Result<i64>;

    fn production_row_count(&self) -> Result<i64>;

    /// Appends rows to staging under `batch_id`. Never touches production.
    async fn append_staging(&self, batch_id: String, rows: Vec<Transaction>) -> Result<usize>;

    /// Dedups the scoped staging rows and upsert-merges them into production,
    /// removing them from staging.
    async fn merge_staging(&self, scope: CompactionScope) -> Result<MergeOutcome>;
}
