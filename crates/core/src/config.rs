//! Tuning knobs for a sync run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::retry::RetryPolicy;

/// Largest id batch the instruments endpoint accepts.
pub const MAX_REFERENCE_BATCH_SIZE: usize = 100;

/// When staged rows are merged into production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionMode {
    /// Compact whenever `compaction_batch_size` rows have been staged.
    PerBatch,
    /// Compact once after every account has been fetched.
    EndOfRun,
}

impl std::str::FromStr for CompactionMode {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "per_batch" => Ok(Self::PerBatch),
            "end_of_run" => Ok(Self::EndOfRun),
            other => Err(Error::Config(format!("unknown compaction mode '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Minimum delay between upstream requests.
    pub rate_limit_delay: Duration,
    pub max_workers: usize,
    pub compaction_batch_size: usize,
    /// Accounts staging at least this many rows get a dedicated compaction.
    pub large_account_threshold: usize,
    pub compaction_mode: CompactionMode,
    pub max_retries: usize,
    pub retry_base_delay: Duration,
    pub use_staging: bool,
    /// When set, only these accounts are synced.
    pub account_allow_list: Option<Vec<String>>,
    pub default_lookback: Duration,
    pub page_size: u32,
    pub offset_limit: u32,
    pub reference_batch_size: usize,
    pub cursor_drift_tolerance: Duration,
    pub verify_checkpoints: bool,
    /// Test-mode cap on the number of accounts.
    pub account_limit: Option<usize>,
    pub full_backfill: bool,
    pub land_chunk_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rate_limit_delay: Duration::from_millis(50),
            max_workers: 5,
            compaction_batch_size: 50_000,
            large_account_threshold: 100_000,
            compaction_mode: CompactionMode::PerBatch,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            use_staging: true,
            account_allow_list: None,
            default_lookback: Duration::from_secs(24 * 60 * 60),
            page_size: 1_000,
            offset_limit: 10_000,
            reference_batch_size: MAX_REFERENCE_BATCH_SIZE,
            cursor_drift_tolerance: Duration::from_secs(60 * 60),
            verify_checkpoints: true,
            account_limit: None,
            full_backfill: false,
            land_chunk_size: 10_000,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::Config("max_workers must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(Error::Config("page_size must be at least 1".into()));
        }
        if self.compaction_batch_size == 0 || self.land_chunk_size == 0 {
            return Err(Error::Config(
                "compaction_batch_size and land_chunk_size must be at least 1".into(),
            ));
        }
        if self.reference_batch_size == 0 || self.reference_batch_size > MAX_REFERENCE_BATCH_SIZE
        {
            return Err(Error::Config(format!(
                "reference_batch_size must be between 1 and {}",
                MAX_REFERENCE_BATCH_SIZE
            )));
        }
        if self.account_limit == Some(0) {
            return Err(Error::Config("account_limit must be at least 1".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_retries(self.max_retries, self.retry_base_delay)
    }
}
