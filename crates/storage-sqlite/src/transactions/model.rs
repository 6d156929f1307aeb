//! Database models for production and staged transactions.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use tradesync_core::transactions::{KeyQuality, Side, Transaction};

use crate::errors::StorageError;

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::transactions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TransactionDB {
    pub idempotency_key: String,
    pub key_quality: String,
    pub external_id: String,
    pub account_id: String,
    pub instrument_id: Option<String>,
    pub occurred_at: i64,
    pub partition_day: String,
    pub side: Option<String>,
    pub price: Option<String>,
    pub size: Option<String>,
    pub token_label: Option<String>,
    pub token_id: Option<String>,
    pub transaction_hash: Option<String>,
    pub order_hash: Option<String>,
    pub landed_at: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::transactions_staging)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewStagedTransactionDB {
    pub batch_id: String,
    pub idempotency_key: String,
    pub key_quality: String,
    pub external_id: String,
    pub account_id: String,
    pub instrument_id: Option<String>,
    pub occurred_at: i64,
    pub partition_day: String,
    pub side: Option<String>,
    pub price: Option<String>,
    pub size: Option<String>,
    pub token_label: Option<String>,
    pub token_id: Option<String>,
    pub transaction_hash: Option<String>,
    pub order_hash: Option<String>,
    pub landed_at: String,
}

impl NewStagedTransactionDB {
    pub fn new(batch_id: &str, landed_at: &str, transaction: Transaction) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            partition_day: transaction.partition_day().format("%Y-%m-%d").to_string(),
            idempotency_key: transaction.idempotency_key,
            key_quality: transaction.key_quality.as_str().to_string(),
            external_id: transaction.external_id,
            account_id: transaction.account_id,
            instrument_id: transaction.instrument_id,
            occurred_at: transaction.occurred_at.timestamp(),
            side: transaction.side.map(|s| s.as_str().to_string()),
            price: transaction.price.map(|p| p.to_string()),
            size: transaction.size.map(|s| s.to_string()),
            token_label: transaction.token_label,
            token_id: transaction.token_id,
            transaction_hash: transaction.transaction_hash,
            order_hash: transaction.order_hash,
            landed_at: landed_at.to_string(),
        }
    }
}

fn decimal(value: Option<String>) -> Result<Option<Decimal>, StorageError> {
    value
        .map(|v| {
            Decimal::from_str(&v)
                .map_err(|e| StorageError::InvalidValue(format!("decimal '{}': {}", v, e)))
        })
        .transpose()
}

impl TryFrom<TransactionDB> for Transaction {
    type Error = StorageError;

    fn try_from(row: TransactionDB) -> Result<Self, Self::Error> {
        let occurred_at = DateTime::<Utc>::from_timestamp(row.occurred_at, 0).ok_or_else(|| {
            StorageError::InvalidValue(format!("timestamp {}", row.occurred_at))
        })?;
        let key_quality = KeyQuality::from_str(&row.key_quality)
            .map_err(|e| StorageError::InvalidValue(e.to_string()))?;
        Ok(Transaction {
            idempotency_key: row.idempotency_key,
            key_quality,
            external_id: row.external_id,
            account_id: row.account_id,
            instrument_id: row.instrument_id,
            occurred_at,
            side: row.side.as_deref().and_then(Side::parse),
            price: decimal(row.price)?,
            size: decimal(row.size)?,
            token_label: row.token_label,
            token_id: row.token_id,
            transaction_hash: row.transaction_hash,
            order_hash: row.order_hash,
        })
    }
}
