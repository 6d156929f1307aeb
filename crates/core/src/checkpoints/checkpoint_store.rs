//! Durable per-account progress with verification against landed rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, warn};

use super::checkpoints_model::AccountCheckpoint;
use super::checkpoints_traits::CheckpointRepositoryTrait;
use crate::errors::{Error, Result};
use crate::retry::RetryPolicy;
use crate::transactions::TransactionRepositoryTrait;

#[derive(Clone)]
pub struct CheckpointStore {
    repository: Arc<dyn CheckpointRepositoryTrait>,
    transactions: Arc<dyn TransactionRepositoryTrait>,
    retry: RetryPolicy,
    run_id: String,
    verify_enabled: bool,
}

impl CheckpointStore {
    pub fn new(
        repository: Arc<dyn CheckpointRepositoryTrait>,
        transactions: Arc<dyn TransactionRepositoryTrait>,
        retry: RetryPolicy,
        run_id: impl Into<String>,
        verify_enabled: bool,
    ) -> Self {
        Self {
            repository,
            transactions,
            retry,
            run_id: run_id.into(),
            verify_enabled,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn current_checkpoint(&self, account_id: &str) -> Result<Option<AccountCheckpoint>> {
        Ok(self
            .repository
            .get_checkpoint(account_id)?
            .filter(|checkpoint| checkpoint.run_id == self.run_id))
    }

    /// True when the account already finished successfully in this run window
    /// and the landed rows back the claim.
    pub fn is_complete(&self, account_id: &str) -> Result<bool> {
        let Some(checkpoint) = self.current_checkpoint(account_id)? else {
            return Ok(false);
        };
        if !(checkpoint.completed && checkpoint.succeeded) {
            return Ok(false);
        }
        if !self.verify_enabled {
            return Ok(true);
        }
        if self.verify(account_id)? {
            return Ok(true);
        }
        warn!(
            "Checkpoint for {} claims {} records but landed rows do not match; reprocessing",
            account_id, checkpoint.record_count
        );
        Ok(false)
    }

    /// Re-derives the checkpoint's claim from the destination.
    ///
    /// Returns false when a successful checkpoint counts more records than
    /// are actually landed for the account (including the zero-row case).
    pub fn verify(&self, account_id: &str) -> Result<bool> {
        let Some(checkpoint) = self.current_checkpoint(account_id)? else {
            return Ok(false);
        };
        if !checkpoint.succeeded || checkpoint.record_count == 0 {
            return Ok(true);
        }
        let landed = self.transactions.count_account_rows(account_id)?;
        debug!(
            "Verifying checkpoint for {}: claimed {}, landed {}",
            account_id, checkpoint.record_count, landed
        );
        Ok(landed >= checkpoint.record_count)
    }

    /// Lower bound to fetch the account from in this window.
    ///
    /// An account whose last checkpoint failed keeps the earlier of its
    /// carried bound and the window's, so closing a window never drops
    /// history it still owes.
    pub fn since_for(
        &self,
        account_id: &str,
        window_since: Option<DateTime<Utc>>,
    ) -> Result<Option<DateTime<Utc>>> {
        let carried = match self.repository.get_checkpoint(account_id)? {
            Some(checkpoint) if !checkpoint.succeeded => checkpoint.pending_since,
            _ => return Ok(window_since),
        };
        let since = match (carried, window_since) {
            (Some(carried), Some(window)) => Some(carried.min(window)),
            _ => None,
        };
        if since != window_since {
            debug!(
                "Account {} carries an earlier lower bound {:?} from a failed run",
                account_id, since
            );
        }
        Ok(since)
    }

    pub async fn mark_complete(
        &self,
        account_id: &str,
        record_count: i64,
        succeeded: bool,
    ) -> Result<()> {
        self.write(AccountCheckpoint {
            account_id: account_id.to_string(),
            run_id: self.run_id.clone(),
            completed: true,
            succeeded,
            record_count,
            processed_at: Utc::now(),
            failed_stage: None,
            last_error: None,
            pending_since: None,
        })
        .await
    }

    /// Records a failed account along with the lower bound it was fetched
    /// from, which later windows carry forward.
    pub async fn mark_failed(
        &self,
        account_id: &str,
        stage: &str,
        message: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.write(AccountCheckpoint {
            account_id: account_id.to_string(),
            run_id: self.run_id.clone(),
            completed: false,
            succeeded: false,
            record_count: 0,
            processed_at: Utc::now(),
            failed_stage: Some(stage.to_string()),
            last_error: Some(message.to_string()),
            pending_since: since,
        })
        .await
    }

    async fn write(&self, checkpoint: AccountCheckpoint) -> Result<()> {
        let account_id = checkpoint.account_id.clone();
        self.retry
            .run("Checkpoint write", || {
                let repository = Arc::clone(&self.repository);
                let checkpoint = checkpoint.clone();
                async move { repository.upsert_checkpoint(checkpoint).await }
            })
            .await
            .map_err(|err| {
                error!("Checkpoint write for {} failed: {}", account_id, err);
                Error::checkpoint_integrity(account_id, err.to_string())
            })
    }
}
