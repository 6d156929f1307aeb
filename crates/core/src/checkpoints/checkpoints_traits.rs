use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::checkpoints_model::{
    AccountCheckpoint, ActiveRun, CheckpointSummary, CursorState, RunStats,
};
use crate::errors::Result;

#[async_trait]
pub trait CheckpointRepositoryTrait: Send + Sync {
    fn get_checkpoint(&self, account_id: &str) -> Result<Option<AccountCheckpoint>>;

    /// Counts for one run window.
    fn summarize_checkpoints(&self, run_id: &str) -> Result<CheckpointSummary>;

    /// Replaces the account's current checkpoint.
    async fn upsert_checkpoint(&self, checkpoint: AccountCheckpoint) -> Result<()>;
}

/// The single-row global cursor, which also holds the open run window.
#[async_trait]
pub trait CursorRepositoryTrait: Send + Sync {
    fn get_cursor_state(&self) -> Result<CursorState>;

    async fn begin_run(&self, run: ActiveRun) -> Result<()>;

    /// Advances the cursor, records the stats and closes the run window.
    async fn complete_run(&self, cursor: DateTime<Utc>, stats: RunStats) -> Result<()>;

    /// Closes the run window without moving the cursor.
    async fn abandon_run(&self) -> Result<()>;
}
