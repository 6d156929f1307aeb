use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::SqliteConnection;
use log::debug;
use tradesync_core::checkpoints::{
    AccountCheckpoint, ActiveRun, CheckpointRepositoryTrait, CheckpointSummary, CursorRepositoryTrait,
    CursorState, RunStats,
};
use tradesync_core::errors::Result;

use super::model::{AccountCheckpointDB, SyncCursorDB, CURSOR_ROW_ID};
use crate::db::{get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{account_checkpoints, sync_cursor};

pub struct CheckpointRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl CheckpointRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }

    pub fn count_all(&self) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        Ok(account_checkpoints::table
            .select(count_star())
            .first::<i64>(&mut conn)
            .map_err(StorageError::from)?)
    }
}

#[async_trait]
impl CheckpointRepositoryTrait for CheckpointRepository {
    fn get_checkpoint(&self, account_id: &str) -> Result<Option<AccountCheckpoint>> {
        let mut conn = get_connection(&self.pool)?;
        let row = account_checkpoints::table
            .find(account_id)
            .select(AccountCheckpointDB::as_select())
            .first::<AccountCheckpointDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(row.map(AccountCheckpoint::try_from).transpose()?)
    }

    fn summarize_checkpoints(&self, run_id: &str) -> Result<CheckpointSummary> {
        let mut conn = get_connection(&self.pool)?;
        let rows = account_checkpoints::table
            .filter(account_checkpoints::run_id.eq(run_id))
            .group_by(account_checkpoints::succeeded)
            .select((account_checkpoints::succeeded, count_star()))
            .load::<(bool, i64)>(&mut conn)
            .map_err(StorageError::from)?;
        let mut summary = CheckpointSummary::default();
        for (succeeded, count) in rows {
            if succeeded {
                summary.succeeded += count;
            } else {
                summary.failed += count;
            }
        }
        Ok(summary)
    }

    async fn upsert_checkpoint(&self, checkpoint: AccountCheckpoint) -> Result<()> {
        let row = AccountCheckpointDB::from(checkpoint);
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                diesel::insert_into(account_checkpoints::table)
                    .values(&row)
                    .on_conflict(account_checkpoints::account_id)
                    .do_update()
                    .set(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }
}

pub struct CursorRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl CursorRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }
}

fn load_cursor_row(conn: &mut SqliteConnection) -> Result<Option<SyncCursorDB>> {
    Ok(sync_cursor::table
        .find(CURSOR_ROW_ID)
        .select(SyncCursorDB::as_select())
        .first::<SyncCursorDB>(conn)
        .optional()
        .map_err(StorageError::from)?)
}

#[async_trait]
impl CursorRepositoryTrait for CursorRepository {
    fn get_cursor_state(&self) -> Result<CursorState> {
        let mut conn = get_connection(&self.pool)?;
        Ok(load_cursor_row(&mut conn)?
            .map(CursorState::from)
            .unwrap_or_default())
    }

    async fn begin_run(&self, run: ActiveRun) -> Result<()> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                let now = Utc::now().to_rfc3339();
                let since = run.since.map(|t| t.timestamp());
                let started_at = run.started_at.timestamp();
                diesel::insert_into(sync_cursor::table)
                    .values((
                        sync_cursor::id.eq(CURSOR_ROW_ID),
                        sync_cursor::active_run_id.eq(&run.run_id),
                        sync_cursor::active_since.eq(since),
                        sync_cursor::active_started_at.eq(started_at),
                        sync_cursor::updated_at.eq(&now),
                    ))
                    .on_conflict(sync_cursor::id)
                    .do_update()
                    .set((
                        sync_cursor::active_run_id.eq(&run.run_id),
                        sync_cursor::active_since.eq(since),
                        sync_cursor::active_started_at.eq(started_at),
                        sync_cursor::updated_at.eq(&now),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                debug!("Opened run window {}", run.run_id);
                Ok(())
            })
            .await
    }

    async fn complete_run(&self, cursor: DateTime<Utc>, stats: RunStats) -> Result<()> {
        let stats = serde_json::to_string(&stats)?;
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                let started_at = load_cursor_row(conn)?.and_then(|row| row.active_started_at);
                let now = Utc::now().to_rfc3339();
                let cursor = cursor.timestamp();
                diesel::insert_into(sync_cursor::table)
                    .values((
                        sync_cursor::id.eq(CURSOR_ROW_ID),
                        sync_cursor::cursor.eq(cursor),
                        sync_cursor::last_run_started_at.eq(started_at),
                        sync_cursor::last_run_stats.eq(&stats),
                        sync_cursor::updated_at.eq(&now),
                    ))
                    .on_conflict(sync_cursor::id)
                    .do_update()
                    .set((
                        sync_cursor::cursor.eq(cursor),
                        sync_cursor::active_run_id.eq(None::<String>),
                        sync_cursor::active_since.eq(None::<i64>),
                        sync_cursor::active_started_at.eq(None::<i64>),
                        sync_cursor::last_run_started_at.eq(started_at),
                        sync_cursor::last_run_stats.eq(&stats),
                        sync_cursor::updated_at.eq(&now),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn abandon_run(&self) -> Result<()> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                diesel::update(sync_cursor::table.find(CURSOR_ROW_ID))
                    .set((
                        sync_cursor::active_run_id.eq(None::<String>),
                        sync_cursor::active_since.eq(None::<i64>),
                        sync_cursor::active_started_at.eq(None::<i64>),
                        sync_cursor::updated_at.eq(Utc::now().to_rfc3339()),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }
}
