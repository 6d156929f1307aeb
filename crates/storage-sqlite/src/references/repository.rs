use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sql_types::Text;
use diesel::SqliteConnection;
use log::debug;
use tradesync_core::errors::Result;
use tradesync_core::references::{
    Grouping, Instrument, InstrumentStatus, ReferenceRepositoryTrait,
};

use super::model::{GroupingDB, InstrumentDB};
use crate::db::{get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{groupings, instruments};

const ID_LOOKUP_CHUNK: usize = 500;

#[derive(QueryableByName)]
struct OrphanRow {
    #[diesel(sql_type = Text)]
    instrument_id: String,
}

pub struct ReferenceRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl ReferenceRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }

    pub fn get_instrument(&self, instrument_id: &str) -> Result<Option<Instrument>> {
        let mut conn = get_connection(&self.pool)?;
        let row = instruments::table
            .find(instrument_id)
            .select(InstrumentDB::as_select())
            .first::<InstrumentDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(row.map(Instrument::from))
    }

    pub fn get_grouping(&self, grouping_id: &str) -> Result<Option<Grouping>> {
        let mut conn = get_connection(&self.pool)?;
        let row = groupings::table
            .find(grouping_id)
            .select(GroupingDB::as_select())
            .first::<GroupingDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(row.map(Grouping::from))
    }

    pub fn instrument_count(&self) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        Ok(instruments::table
            .select(count_star())
            .first::<i64>(&mut conn)
            .map_err(StorageError::from)?)
    }
}

#[async_trait]
impl ReferenceRepositoryTrait for ReferenceRepository {
    fn instrument_statuses(
        &self,
        instrument_ids: &[String],
    ) -> Result<HashMap<String, InstrumentStatus>> {
        let mut conn = get_connection(&self.pool)?;
        let mut statuses = HashMap::new();
        for chunk in instrument_ids.chunks(ID_LOOKUP_CHUNK) {
            let rows = instruments::table
                .filter(instruments::instrument_id.eq_any(chunk))
                .select((instruments::instrument_id, instruments::status))
                .load::<(String, String)>(&mut conn)
                .map_err(StorageError::from)?;
            statuses.extend(
                rows.into_iter()
                    .map(|(id, status)| (id, InstrumentStatus::from(status))),
            );
        }
        Ok(statuses)
    }

    fn open_instrument_ids(&self) -> Result<Vec<String>> {
        let mut conn = get_connection(&self.pool)?;
        Ok(instruments::table
            .filter(instruments::status.eq(InstrumentStatus::Open.as_str()))
            .select(instruments::instrument_id)
            .order(instruments::instrument_id.asc())
            .load::<String>(&mut conn)
            .map_err(StorageError::from)?)
    }

    fn orphaned_instrument_ids(&self) -> Result<Vec<String>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = diesel::sql_query(
            "SELECT refs.instrument_id AS instrument_id FROM ( \
                 SELECT instrument_id FROM transactions WHERE instrument_id IS NOT NULL \
                 UNION \
                 SELECT instrument_id FROM transactions_staging WHERE instrument_id IS NOT NULL \
             ) refs \
             LEFT JOIN instruments i ON i.instrument_id = refs.instrument_id \
             WHERE i.instrument_id IS NULL \
             ORDER BY refs.instrument_id",
        )
        .load::<OrphanRow>(&mut conn)
        .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(|r| r.instrument_id).collect())
    }

    async fn upsert_instruments(&self, incoming: Vec<Instrument>) -> Result<usize> {
        if incoming.is_empty() {
            return Ok(0);
        }
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                let ids: Vec<String> = incoming.iter().map(|i| i.instrument_id.clone()).collect();
                let mut terminal: HashMap<String, String> = HashMap::new();
                for chunk in ids.chunks(ID_LOOKUP_CHUNK) {
                    let rows = instruments::table
                        .filter(instruments::instrument_id.eq_any(chunk))
                        .select((instruments::instrument_id, instruments::status))
                        .load::<(String, String)>(conn)
                        .map_err(StorageError::from)?;
                    terminal.extend(rows.into_iter().filter(|(_, status)| {
                        InstrumentStatus::from(status.as_str()).is_terminal()
                    }));
                }

                let now = Utc::now().to_rfc3339();
                let mut written = 0;
                for instrument in incoming {
                    let mut row = InstrumentDB::new(instrument, &now);
                    if let Some(status) = terminal.get(&row.instrument_id) {
                        if !InstrumentStatus::from(row.status.as_str()).is_terminal() {
                            debug!(
                                "Keeping terminal status '{}' for instrument {}",
                                status, row.instrument_id
                            );
                            row.status = status.clone();
                        }
                    }
                    written += diesel::insert_into(instruments::table)
                        .values(&row)
                        .on_conflict(instruments::instrument_id)
                        .do_update()
                        .set(&row)
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                Ok(written)
            })
            .await
    }

    async fn upsert_groupings(&self, incoming: Vec<Grouping>) -> Result<usize> {
        if incoming.is_empty() {
            return Ok(0);
        }
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                let now = Utc::now().to_rfc3339();
                let mut written = 0;
                for grouping in incoming {
                    let row = GroupingDB::new(grouping, &now);
                    written += diesel::insert_into(groupings::table)
                        .values(&row)
                        .on_conflict(groupings::grouping_id)
                        .do_update()
                        .set(&row)
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                Ok(written)
            })
            .await
    }
}
