//! Staging area and partitioned production table for transactions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::{count_star, max};
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sql_types::{BigInt, Text};
use diesel::SqliteConnection;
use log::{debug, warn};
use tradesync_core::errors::{Error, Result};
use tradesync_core::transactions::{
    CompactionScope, LandedVersion, MergeOutcome, Transaction, TransactionRepositoryTrait,
};

use super::model::{NewStagedTransactionDB, TransactionDB};
use crate::db::{get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{partition_writes, transactions, transactions_staging};

/// Rows per multi-row INSERT into staging.
const STAGING_INSERT_CHUNK: usize = 500;
/// Keys per `IN (...)` lookup.
const KEY_LOOKUP_CHUNK: usize = 500;

const TRANSACTION_COLUMNS: &str = "idempotency_key, key_quality, external_id, account_id, \
     instrument_id, occurred_at, partition_day, side, price, size, token_label, token_id, \
     transaction_hash, order_hash, landed_at";

fn escape_sqlite_str(value: &str) -> String {
    value.replace('\'', "''")
}

fn scope_predicate(scope: &CompactionScope) -> String {
    match scope {
        CompactionScope::All => "1 = 1".to_string(),
        CompactionScope::Accounts(accounts) if accounts.is_empty() => "0 = 1".to_string(),
        CompactionScope::Accounts(accounts) => format!(
            "account_id IN ({})",
            accounts
                .iter()
                .map(|a| format!("'{}'", escape_sqlite_str(a)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        CompactionScope::Batch(batch_id) => {
            format!("batch_id = '{}'", escape_sqlite_str(batch_id))
        }
    }
}

fn merge_sql(predicate: &str) -> String {
    format!(
        "WITH ranked AS ( \
             SELECT {columns}, ROW_NUMBER() OVER ( \
                 PARTITION BY idempotency_key ORDER BY occurred_at DESC, external_id DESC \
             ) AS rn \
             FROM transactions_staging WHERE {predicate} \
         ) \
         INSERT INTO transactions ({columns}) \
         SELECT {columns} FROM ranked WHERE rn = 1 \
         ON CONFLICT(idempotency_key) DO UPDATE SET \
             key_quality = excluded.key_quality, \
             external_id = excluded.external_id, \
             account_id = excluded.account_id, \
             instrument_id = excluded.instrument_id, \
             occurred_at = excluded.occurred_at, \
             partition_day = excluded.partition_day, \
             side = excluded.side, \
             price = excluded.price, \
             size = excluded.size, \
             token_label = excluded.token_label, \
             token_id = excluded.token_id, \
             transaction_hash = excluded.transaction_hash, \
             order_hash = excluded.order_hash, \
             landed_at = excluded.landed_at \
         WHERE excluded.occurred_at > transactions.occurred_at \
            OR (excluded.occurred_at = transactions.occurred_at \
                AND excluded.external_id > transactions.external_id)",
        columns = TRANSACTION_COLUMNS,
        predicate = predicate
    )
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    c: i64,
}

#[derive(QueryableByName)]
struct PartitionRow {
    #[diesel(sql_type = Text)]
    partition_day: String,
    #[diesel(sql_type = BigInt)]
    keys: i64,
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

fn partition_writes_on(conn: &mut SqliteConnection, day: &str) -> Result<i64> {
    Ok(partition_writes::table
        .filter(partition_writes::write_day.eq(day))
        .select(count_star())
        .first::<i64>(conn)
        .map_err(StorageError::from)?)
}

pub struct TransactionRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
    /// Maximum partition-mutating operations per UTC day.
    partition_write_quota: Option<u32>,
}

impl TransactionRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self {
            pool,
            writer,
            partition_write_quota: None,
        }
    }

    pub fn with_partition_write_quota(mut self, quota: Option<u32>) -> Self {
        self.partition_write_quota = quota;
        self
    }

    /// Partition-mutating operations recorded today (UTC).
    pub fn partition_writes_today(&self) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        partition_writes_on(&mut conn, &today())
    }

    pub fn load_account_transactions(&self, account: &str) -> Result<Vec<Transaction>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = transactions::table
            .filter(transactions::account_id.eq(account))
            .order((transactions::occurred_at.asc(), transactions::idempotency_key.asc()))
            .select(TransactionDB::as_select())
            .load::<TransactionDB>(&mut conn)
            .map_err(StorageError::from)?;
        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            result.push(Transaction::try_from(row)?);
        }
        Ok(result)
    }
}

#[async_trait]
impl TransactionRepositoryTrait for TransactionRepository {
    fn landed_versions(&self, keys: &[String]) -> Result<HashMap<String, LandedVersion>> {
        let mut conn = get_connection(&self.pool)?;
        // Both tables are read from one snapshot.
        let rows = conn.transaction::<_, StorageError, _>(|conn| {
            let mut rows: Vec<(String, i64, String)> = Vec::new();
            for chunk in keys.chunks(KEY_LOOKUP_CHUNK) {
                rows.extend(
                    transactions::table
                        .filter(transactions::idempotency_key.eq_any(chunk))
                        .select((
                            transactions::idempotency_key,
                            transactions::occurred_at,
                            transactions::external_id,
                        ))
                        .load::<(String, i64, String)>(conn)?,
                );
                rows.extend(
                    transactions_staging::table
                        .filter(transactions_staging::idempotency_key.eq_any(chunk))
                        .select((
                            transactions_staging::idempotency_key,
                            transactions_staging::occurred_at,
                            transactions_staging::external_id,
                        ))
                        .load::<(String, i64, String)>(conn)?,
                );
            }
            Ok(rows)
        })?;

        let mut versions: HashMap<String, LandedVersion> = HashMap::new();
        for (key, occurred_at, external_id) in rows {
            let Some(occurred_at) = DateTime::<Utc>::from_timestamp(occurred_at, 0) else {
                warn!("Skipping landed row {} with invalid timestamp", key);
                continue;
            };
            let version = LandedVersion {
                occurred_at,
                external_id,
            };
            let merged = match versions.remove(&key) {
                Some(existing) => existing.newest(version),
                None => version,
            };
            versions.insert(key, merged);
        }
        Ok(versions)
    }

    fn count_account_rows(&self, account: &str) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        let row = diesel::sql_query(
            "SELECT COUNT(*) AS c FROM ( \
                 SELECT idempotency_key FROM transactions WHERE account_id = ? \
                 UNION \
                 SELECT idempotency_key FROM transactions_staging WHERE account_id = ? \
             )",
        )
        .bind::<Text, _>(account)
        .bind::<Text, _>(account)
        .get_result::<CountRow>(&mut conn)
        .map_err(StorageError::from)?;
        Ok(row.c)
    }

    fn max_landed_occurred_at(&self) -> Result<Option<DateTime<Utc>>> {
        let mut conn = get_connection(&self.pool)?;
        let latest = transactions::table
            .select(max(transactions::occurred_at))
            .first::<Option<i64>>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(latest.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)))
    }

    fn staging_row_count(&self) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        Ok(transactions_staging::table
            .select(count_star())
            .first::<i64>(&mut conn)
            .map_err(StorageError::from)?)
    }

    fn production_row_count(&self) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        Ok(transactions::table
            .select(count_star())
            .first::<i64>(&mut conn)
            .map_err(StorageError::from)?)
    }

    async fn append_staging(&self, batch_id: String, rows: Vec<Transaction>) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                let landed_at = Utc::now().to_rfc3339();
                let rows: Vec<NewStagedTransactionDB> = rows
                    .into_iter()
                    .map(|row| NewStagedTransactionDB::new(&batch_id, &landed_at, row))
                    .collect();
                let mut inserted = 0;
                for chunk in rows.chunks(STAGING_INSERT_CHUNK) {
                    inserted += diesel::insert_into(transactions_staging::table)
                        .values(chunk)
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                Ok(inserted)
            })
            .await
    }

    async fn merge_staging(&self, scope: CompactionScope) -> Result<MergeOutcome> {
        let quota = self.partition_write_quota;
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<MergeOutcome> {
                let predicate = scope_predicate(&scope);

                let staged = diesel::sql_query(format!(
                    "SELECT COUNT(*) AS c FROM transactions_staging WHERE {}",
                    predicate
                ))
                .get_result::<CountRow>(conn)
                .map_err(StorageError::from)?;
                if staged.c == 0 {
                    return Ok(MergeOutcome::default());
                }

                let partitions = diesel::sql_query(format!(
                    "SELECT partition_day, COUNT(DISTINCT idempotency_key) AS keys \
                     FROM transactions_staging WHERE {} GROUP BY partition_day",
                    predicate
                ))
                .load::<PartitionRow>(conn)
                .map_err(StorageError::from)?;

                let day = today();
                if let Some(quota) = quota {
                    let used = partition_writes_on(conn, &day)?;
                    let needed = partitions.len() as i64;
                    if used + needed > i64::from(quota) {
                        return Err(Error::QuotaExceeded(format!(
                            "merge needs {} partition writes but {} of {} are used for {}",
                            needed, used, quota, day
                        )));
                    }
                }

                let rows_merged = diesel::sql_query(merge_sql(&predicate))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                diesel::sql_query(format!(
                    "DELETE FROM transactions_staging WHERE {}",
                    predicate
                ))
                .execute(conn)
                .map_err(StorageError::from)?;

                let written_at = Utc::now().to_rfc3339();
                for partition in &partitions {
                    diesel::insert_into(partition_writes::table)
                        .values((
                            partition_writes::write_day.eq(&day),
                            partition_writes::partition_day.eq(&partition.partition_day),
                            partition_writes::rows_written.eq(partition.keys),
                            partition_writes::written_at.eq(&written_at),
                        ))
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }

                debug!(
                    "Merged {} staged rows into {} partitions ({} rows written)",
                    staged.c,
                    partitions.len(),
                    rows_merged
                );
                Ok(MergeOutcome {
                    staged_rows: staged.c as usize,
                    rows_merged,
                    partitions_touched: partitions.len(),
                })
            })
            .await
    }
}
