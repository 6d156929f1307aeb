//! Command-line arguments.

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tradesync_core::{CompactionMode, Error, SyncConfig};

#[derive(Parser, Debug)]
#[command(name = "tradesync")]
#[command(about = "Incremental bulk ingestion of account transactions into SQLite")]
pub struct Cli {
    /// Database directory, or a path ending in .db / .sqlite
    #[arg(long, env = "TRADESYNC_DB", default_value = "./data")]
    pub db: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run (or resume) a sync and print the run summary as JSON
    Sync(SyncArgs),

    /// Print the cursor, checkpoint counts and table sizes
    Status,

    /// Manage the tracked account list
    Accounts {
        #[command(subcommand)]
        command: AccountsCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum AccountsCommand {
    /// Track accounts (comma separated)
    Add {
        #[arg(value_delimiter = ',', required = true)]
        accounts: Vec<String>,
    },
    /// Stop tracking accounts (comma separated)
    Remove {
        #[arg(value_delimiter = ',', required = true)]
        accounts: Vec<String>,
    },
    /// List tracked accounts
    List,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[arg(long, env = "TRADESYNC_API_URL")]
    pub api_url: String,

    #[arg(long, env = "TRADESYNC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Abandon an interrupted run window and start a fresh one
    #[arg(long)]
    pub new_run: bool,

    /// Minimum delay between upstream requests, in milliseconds
    #[arg(long, env = "TRADESYNC_RATE_LIMIT_MS", default_value_t = 50)]
    pub rate_limit_ms: u64,

    #[arg(long, env = "TRADESYNC_MAX_WORKERS", default_value_t = 5)]
    pub max_workers: usize,

    #[arg(long, env = "TRADESYNC_COMPACTION_BATCH_SIZE", default_value_t = 50_000)]
    pub compaction_batch_size: usize,

    #[arg(long, env = "TRADESYNC_LARGE_ACCOUNT_THRESHOLD", default_value_t = 100_000)]
    pub large_account_threshold: usize,

    /// per-batch or end-of-run
    #[arg(long, env = "TRADESYNC_COMPACTION_MODE", default_value = "per-batch")]
    pub compaction_mode: String,

    #[arg(long, env = "TRADESYNC_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: usize,

    #[arg(long, env = "TRADESYNC_RETRY_BASE_MS", default_value_t = 2_000)]
    pub retry_base_ms: u64,

    /// Write straight to production instead of staging first
    #[arg(long)]
    pub direct_write: bool,

    /// Only sync these accounts (comma separated)
    #[arg(long, env = "TRADESYNC_ACCOUNTS", value_delimiter = ',')]
    pub accounts: Option<Vec<String>>,

    #[arg(long, env = "TRADESYNC_LOOKBACK_HOURS", default_value_t = 24)]
    pub lookback_hours: u64,

    #[arg(long, env = "TRADESYNC_PAGE_SIZE", default_value_t = 1_000)]
    pub page_size: u32,

    #[arg(long, env = "TRADESYNC_OFFSET_LIMIT", default_value_t = 10_000)]
    pub offset_limit: u32,

    #[arg(long, env = "TRADESYNC_REFERENCE_BATCH_SIZE", default_value_t = 100)]
    pub reference_batch_size: usize,

    #[arg(long, env = "TRADESYNC_DRIFT_TOLERANCE_MINUTES", default_value_t = 60)]
    pub drift_tolerance_minutes: u64,

    /// Trust checkpoints without recounting landed rows
    #[arg(long)]
    pub skip_verify: bool,

    /// Test mode: sync at most this many accounts
    #[arg(long, env = "TRADESYNC_ACCOUNT_LIMIT")]
    pub limit: Option<usize>,

    /// Fetch complete history with no lower bound
    #[arg(long)]
    pub full_backfill: bool,

    #[arg(long, env = "TRADESYNC_LAND_CHUNK_SIZE", default_value_t = 10_000)]
    pub land_chunk_size: usize,

    /// Maximum partition-mutating writes per UTC day
    #[arg(long, env = "TRADESYNC_PARTITION_WRITE_QUOTA")]
    pub partition_write_quota: Option<u32>,
}

fn duration_of(value: u64, unit_secs: u64, flag: &str) -> tradesync_core::Result<Duration> {
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::Config(format!("--{} {} is out of range", flag, value)))
}

impl SyncArgs {
    pub fn to_config(&self) -> tradesync_core::Result<SyncConfig> {
        let config = SyncConfig {
            rate_limit_delay: Duration::from_millis(self.rate_limit_ms),
            max_workers: self.max_workers,
            compaction_batch_size: self.compaction_batch_size,
            large_account_threshold: self.large_account_threshold,
            compaction_mode: self.compaction_mode.parse::<CompactionMode>()?,
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_ms),
            use_staging: !self.direct_write,
            account_allow_list: self.accounts.clone().filter(|a| !a.is_empty()),
            default_lookback: duration_of(self.lookback_hours, 60 * 60, "lookback-hours")?,
            page_size: self.page_size,
            offset_limit: self.offset_limit,
            reference_batch_size: self.reference_batch_size,
            cursor_drift_tolerance: duration_of(
                self.drift_tolerance_minutes,
                60,
                "drift-tolerance-minutes",
            )?,
            verify_checkpoints: !self.skip_verify,
            account_limit: self.limit,
            full_backfill: self.full_backfill,
            land_chunk_size: self.land_chunk_size,
        };
        config.validate()?;
        Ok(config)
    }
}
