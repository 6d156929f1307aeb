//! Per-account checkpoints and the global sync cursor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCheckpoint {
    pub account_id: String,
    /// Run window the checkpoint was written in.
    pub run_id: String,
    pub completed: bool,
    pub succeeded: bool,
    /// Rows this run landed for the account that were not already present.
    pub record_count: i64,
    pub processed_at: DateTime<Utc>,
    /// Stage the account failed in, if it failed.
    pub failed_stage: Option<String>,
    pub last_error: Option<String>,
    /// Lower bound a failed account still owes. Carried into later windows
    /// until the account succeeds; `None` means unbounded.
    pub pending_since: Option<DateTime<Utc>>,
}

/// An open run window. Interrupted runs resume it instead of starting over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRun {
    pub run_id: String,
    pub since: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
}

/// Statistics recorded on the cursor row when a run completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub duration_ms: i64,
    pub records_landed: i64,
    pub instruments_landed: i64,
    pub groupings_landed: i64,
    pub accounts_processed: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorState {
    pub cursor: Option<DateTime<Utc>>,
    pub active_run: Option<ActiveRun>,
    pub last_run_started_at: Option<DateTime<Utc>>,
    pub last_run: Option<RunStats>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointSummary {
    pub succeeded: i64,
    pub failed: i64,
}
