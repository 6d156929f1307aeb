//! Wires storage, the upstream client and the orchestrator together.

use std::sync::Arc;

use tradesync_core::sync::{SyncDependencies, SyncOrchestrator};
use tradesync_core::{Result, SyncConfig};
use tradesync_storage_sqlite::{
    AccountRepository, CheckpointRepository, CursorRepository, DbPool, ReferenceRepository,
    TransactionRepository, WriteHandle,
};
use tradesync_upstream::{RateLimitedClient, UpstreamApi};

pub struct StoreContext {
    pub transactions: Arc<TransactionRepository>,
    pub references: Arc<ReferenceRepository>,
    pub checkpoints: Arc<CheckpointRepository>,
    pub cursor: Arc<CursorRepository>,
    pub accounts: Arc<AccountRepository>,
}

impl StoreContext {
    pub fn open(location: &str, partition_write_quota: Option<u32>) -> Result<Self> {
        let (pool, writer) = tradesync_storage_sqlite::open(location)?;
        Ok(Self::from_parts(pool, writer, partition_write_quota))
    }

    fn from_parts(pool: Arc<DbPool>, writer: WriteHandle, quota: Option<u32>) -> Self {
        Self {
            transactions: Arc::new(
                TransactionRepository::new(pool.clone(), writer.clone())
                    .with_partition_write_quota(quota),
            ),
            references: Arc::new(ReferenceRepository::new(pool.clone(), writer.clone())),
            checkpoints: Arc::new(CheckpointRepository::new(pool.clone(), writer.clone())),
            cursor: Arc::new(CursorRepository::new(pool.clone(), writer.clone())),
            accounts: Arc::new(AccountRepository::new(pool, writer)),
        }
    }

    pub fn orchestrator(
        &self,
        config: SyncConfig,
        api_url: &str,
        api_key: Option<String>,
    ) -> SyncOrchestrator {
        let client = RateLimitedClient::new(
            api_url,
            api_key,
            config.rate_limit_delay,
            config.retry_policy(),
        );
        let api = Arc::new(UpstreamApi::new(client));
        let deps = SyncDependencies {
            transaction_source: api.clone(),
            reference_source: api,
            transactions: self.transactions.clone(),
            references: self.references.clone(),
            checkpoints: self.checkpoints.clone(),
            cursor: self.cursor.clone(),
            accounts: self.accounts.clone(),
        };
        SyncOrchestrator::new(config, deps)
    }
}
