//! Transaction records as fetched, normalized, and landed.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::idempotency::{derive_key, KeyQuality};
use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn parse(value: &str) -> Option<Side> {
        match value.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

/// A record exactly as the upstream returned it, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceTransaction {
    pub external_id: Option<String>,
    pub instrument_id: Option<String>,
    pub account_id: Option<String>,
    /// Unix seconds.
    pub occurred_at: Option<i64>,
    pub side: Option<String>,
    pub price: Option<Decimal>,
    pub size: Option<Decimal>,
    pub token_label: Option<String>,
    pub token_id: Option<String>,
    pub transaction_hash: Option<String>,
    pub order_hash: Option<String>,
}

/// A validated record carrying its idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub idempotency_key: String,
    pub key_quality: KeyQuality,
    pub external_id: String,
    pub account_id: String,
    pub instrument_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub side: Option<Side>,
    pub price: Option<Decimal>,
    pub size: Option<Decimal>,
    pub token_label: Option<String>,
    pub token_id: Option<String>,
    pub transaction_hash: Option<String>,
    pub order_hash: Option<String>,
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Transaction {
    /// Validate a raw record fetched for `queried_account`.
    ///
    /// The record must have a timestamp, a transaction reference (hash or
    /// external id) and a derivable idempotency key.
    pub fn from_source(source: SourceTransaction, queried_account: &str) -> Result<Transaction> {
        let account_id = clean(source.account_id)
            .unwrap_or_else(|| queried_account.trim().to_string())
            .to_ascii_lowercase();
        let transaction_hash = clean(source.transaction_hash);
        let order_hash = clean(source.order_hash);
        let external_id = clean(source.external_id);

        let timestamp = source
            .occurred_at
            .ok_or_else(|| Error::validation("record has no timestamp"))?;
        let occurred_at = DateTime::<Utc>::from_timestamp(timestamp, 0)
            .ok_or_else(|| Error::validation(format!("timestamp {} out of range", timestamp)))?;

        if transaction_hash.is_none() && external_id.is_none() {
            return Err(Error::validation("record has no transaction reference"));
        }

        let key = derive_key(
            &account_id,
            transaction_hash.as_deref(),
            order_hash.as_deref(),
            Some(timestamp),
            external_id.as_deref(),
        )
        .ok_or_else(|| Error::validation("cannot derive an idempotency key"))?;

        let external_id = external_id
            .or_else(|| order_hash.clone())
            .or_else(|| transaction_hash.clone())
            .unwrap_or_else(|| key.value.clone());

        Ok(Transaction {
            idempotency_key: key.value,
            key_quality: key.quality,
            external_id,
            account_id,
            instrument_id: clean(source.instrument_id),
            occurred_at,
            side: source.side.as_deref().and_then(Side::parse),
            price: source.price,
            size: source.size,
            token_label: clean(source.token_label),
            token_id: clean(source.token_id),
            transaction_hash,
            order_hash,
        })
    }

    /// Day partition of the production table this record lands in.
    pub fn partition_day(&self) -> NaiveDate {
        self.occurred_at.date_naive()
    }

    /// Dedup ordering: later timestamp wins, ties go to the greater external id.
    pub fn supersedes(&self, other: &Transaction) -> bool {
        (self.occurred_at, &self.external_id) > (other.occurred_at, &other.external_id)
    }
}

/// What is already landed for a key, enough to decide whether a record is newer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandedVersion {
    pub occurred_at: DateTime<Utc>,
    pub external_id: String,
}

impl LandedVersion {
    pub fn of(transaction: &Transaction) -> Self {
        Self {
            occurred_at: transaction.occurred_at,
            external_id: transaction.external_id.clone(),
        }
    }

    pub fn is_superseded_by(&self, transaction: &Transaction) -> bool {
        (transaction.occurred_at, &transaction.external_id) > (self.occurred_at, &self.external_id)
    }

    /// Keep whichever of two landed versions is newer.
    pub fn newest(self, other: LandedVersion) -> LandedVersion {
        if (other.occurred_at, &other.external_id) > (self.occurred_at, &self.external_id) {
            other
        } else {
            self
        }
    }
}

/// Pagination position sent with a page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    Offset(u32),
    Token(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub account_id: String,
    pub since: Option<DateTime<Utc>>,
    pub limit: u32,
    pub cursor: PageCursor,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPage {
    pub records: Vec<SourceTransaction>,
    pub has_more: bool,
    pub continuation_token: Option<String>,
}

/// Which staged rows a compaction merges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionScope {
    All,
    Accounts(Vec<String>),
    Batch(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    /// Staged rows consumed by the merge.
    pub staged_rows: usize,
    /// Production rows inserted or overwritten.
    pub rows_merged: usize,
    pub partitions_touched: usize,
}
