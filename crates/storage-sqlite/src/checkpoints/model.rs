//! Database models for account checkpoints and the sync cursor row.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::warn;
use tradesync_core::checkpoints::{AccountCheckpoint, ActiveRun, CursorState, RunStats};

use crate::errors::StorageError;

/// Id of the single cursor row.
pub const CURSOR_ROW_ID: i32 = 1;

#[derive(
    Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone, PartialEq, Eq,
)]
#[diesel(table_name = crate::schema::account_checkpoints)]
#[diesel(primary_key(account_id))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AccountCheckpointDB {
    pub account_id: String,
    pub run_id: String,
    pub completed: bool,
    pub succeeded: bool,
    pub record_count: i64,
    pub processed_at: String,
    pub failed_stage: Option<String>,
    pub last_error: Option<String>,
    /// Unix seconds.
    pub pending_since: Option<i64>,
}

impl From<AccountCheckpoint> for AccountCheckpointDB {
    fn from(checkpoint: AccountCheckpoint) -> Self {
        Self {
            account_id: checkpoint.account_id,
            run_id: checkpoint.run_id,
            completed: checkpoint.completed,
            succeeded: checkpoint.succeeded,
            record_count: checkpoint.record_count,
            processed_at: checkpoint.processed_at.to_rfc3339(),
            failed_stage: checkpoint.failed_stage,
            last_error: checkpoint.last_error,
            pending_since: checkpoint.pending_since.map(|t| t.timestamp()),
        }
    }
}

impl TryFrom<AccountCheckpointDB> for AccountCheckpoint {
    type Error = StorageError;

    fn try_from(row: AccountCheckpointDB) -> Result<Self, Self::Error> {
        let processed_at = DateTime::parse_from_rfc3339(&row.processed_at)
            .map_err(|e| {
                StorageError::InvalidValue(format!("processed_at '{}': {}", row.processed_at, e))
            })?
            .with_timezone(&Utc);
        Ok(AccountCheckpoint {
            account_id: row.account_id,
            run_id: row.run_id,
            completed: row.completed,
            succeeded: row.succeeded,
            record_count: row.record_count,
            processed_at,
            failed_stage: row.failed_stage,
            last_error: row.last_error,
            pending_since: from_unix(row.pending_since),
        })
    }
}

#[derive(Queryable, Identifiable, Insertable, Selectable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = crate::schema::sync_cursor)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncCursorDB {
    pub id: i32,
    pub cursor: Option<i64>,
    pub active_run_id: Option<String>,
    pub active_since: Option<i64>,
    pub active_started_at: Option<i64>,
    pub last_run_started_at: Option<i64>,
    pub last_run_stats: Option<String>,
    pub updated_at: String,
}

fn from_unix(value: Option<i64>) -> Option<DateTime<Utc>> {
    value.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}

impl From<SyncCursorDB> for CursorState {
    fn from(row: SyncCursorDB) -> Self {
        let active_run = match (row.active_run_id, from_unix(row.active_started_at)) {
            (Some(run_id), Some(started_at)) => Some(ActiveRun {
                run_id,
                since: from_unix(row.active_since),
                started_at,
            }),
            _ => None,
        };
        let last_run = row.last_run_stats.as_deref().and_then(|raw| {
            serde_json::from_str::<RunStats>(raw)
                .map_err(|e| warn!("Ignoring unreadable last run stats: {}", e))
                .ok()
        });
        CursorState {
            cursor: from_unix(row.cursor),
            active_run,
            last_run_started_at: from_unix(row.last_run_started_at),
            last_run,
            updated_at: DateTime::parse_from_rfc3339(&row.updated_at)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}
