//! Locally tracked accounts, used as the account directory for a run.

use std::sync::Arc;

use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::SqliteConnection;
use log::info;
use tradesync_core::errors::Result;
use tradesync_core::sync::normalize_accounts;
use tradesync_core::transactions::AccountDirectory;

use crate::db::{get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::tracked_accounts;

pub struct AccountRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl AccountRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }

    /// Adds accounts to the directory, returning how many were new.
    pub async fn register_accounts(&self, accounts: Vec<String>) -> Result<usize> {
        let accounts = normalize_accounts(accounts);
        if accounts.is_empty() {
            return Ok(0);
        }
        let added = self
            .writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                let added_at = Utc::now().to_rfc3339();
                let mut added = 0;
                for account in &accounts {
                    added += diesel::insert_or_ignore_into(tracked_accounts::table)
                        .values((
                            tracked_accounts::account_id.eq(account),
                            tracked_accounts::added_at.eq(&added_at),
                        ))
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                Ok(added)
            })
            .await?;
        info!("Registered {} new accounts", added);
        Ok(added)
    }

    pub async fn remove_accounts(&self, accounts: Vec<String>) -> Result<usize> {
        let accounts = normalize_accounts(accounts);
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                Ok(diesel::delete(
                    tracked_accounts::table.filter(tracked_accounts::account_id.eq_any(accounts)),
                )
                .execute(conn)
                .map_err(StorageError::from)?)
            })
            .await
    }
}

impl AccountDirectory for AccountRepository {
    fn list_accounts(&self) -> Result<Vec<String>> {
        let mut conn = get_connection(&self.pool)?;
        Ok(tracked_accounts::table
            .select(tracked_accounts::account_id)
            .order(tracked_accounts::account_id.asc())
            .load::<String>(&mut conn)
            .map_err(StorageError::from)?)
    }
}
