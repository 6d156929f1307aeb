//! In-memory doubles of the sources and repositories for service tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal_macros::dec;

use crate::checkpoints::{
    AccountCheckpoint, ActiveRun, CheckpointRepositoryTrait, CheckpointSummary, CursorState,
    CursorRepositoryTrait, RunStats,
};
use crate::errors::{Error, Result};
use crate::references::{
    Grouping, Instrument, InstrumentStatus, ReferenceRepositoryTrait, ReferenceSource,
};
use crate::transactions::{
    AccountDirectory, CompactionScope, LandedVersion, MergeOutcome, PageCursor, PageRequest,
    SourceTransaction, Transaction, TransactionPage, TransactionRepositoryTrait,
    TransactionSource,
};

pub fn raw(transaction_hash: &str, occurred_at: i64) -> SourceTransaction {
    SourceTransaction {
        external_id: None,
        instrument_id: Some("m1".to_string()),
        account_id: None,
        occurred_at: Some(occurred_at),
        side: Some("BUY".to_string()),
        price: Some(dec!(0.5)),
        size: Some(dec!(10)),
        token_label: Some("Yes".to_string()),
        token_id: Some("token-1".to_string()),
        transaction_hash: Some(transaction_hash.to_string()),
        order_hash: None,
    }
}

pub fn transaction(account_id: &str, transaction_hash: &str, occurred_at: i64) -> Transaction {
    Transaction::from_source(raw(transaction_hash, occurred_at), account_id).unwrap()
}

pub fn instrument(id: &str, grouping_id: Option<&str>, status: InstrumentStatus) -> Instrument {
    Instrument {
        instrument_id: id.to_string(),
        grouping_id: grouping_id.map(String::from),
        slug: Some(format!("{}-slug", id)),
        title: Some(format!("Instrument {}", id)),
        description: None,
        status,
        winning_outcome_id: None,
        winning_outcome_label: None,
        start_time: None,
        end_time: None,
        close_time: None,
        completed_time: None,
        tags: vec!["Politics".to_string()],
        volume_total: Some(1_000.0),
        liquidity: None,
    }
}

#[derive(Default)]
struct MemoryState {
    production: HashMap<String, Transaction>,
    staging: Vec<(String, Transaction)>,
    instruments: HashMap<String, Instrument>,
    groupings: HashMap<String, Grouping>,
    checkpoints: HashMap<String, AccountCheckpoint>,
    cursor: CursorState,
    accounts: Vec<String>,
    checkpoint_failures: usize,
    checkpoint_error: Option<fn() -> Error>,
    partition_quota: Option<usize>,
    partition_writes: usize,
    merge_attempts: usize,
}

/// Every repository trait over one shared in-memory state.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

fn in_scope(scope: &CompactionScope, batch_id: &str, row: &Transaction) -> bool {
    match scope {
        CompactionScope::All => true,
        CompactionScope::Accounts(accounts) => accounts.contains(&row.account_id),
        CompactionScope::Batch(batch) => batch == batch_id,
    }
}

impl MemoryStore {
    pub fn seed_production(&self, rows: Vec<Transaction>) {
        let mut state = self.state.lock().unwrap();
        for row in rows {
            state.production.insert(row.idempotency_key.clone(), row);
        }
    }

    pub fn seed_staging(&self, rows: Vec<Transaction>) {
        let mut state = self.state.lock().unwrap();
        for row in rows {
            state.staging.push(("seed".to_string(), row));
        }
    }

    pub fn seed_instruments(&self, instruments: Vec<Instrument>) {
        let mut state = self.state.lock().unwrap();
        for instrument in instruments {
            state
                .instruments
                .insert(instrument.instrument_id.clone(), instrument);
        }
    }

    pub fn set_accounts(&self, accounts: &[&str]) {
        self.state.lock().unwrap().accounts = accounts.iter().map(|a| a.to_string()).collect();
    }

    pub fn set_partition_quota(&self, quota: usize) {
        self.state.lock().unwrap().partition_quota = Some(quota);
    }

    pub fn fail_checkpoint_writes(&self, times: usize, error: fn() -> Error) {
        let mut state = self.state.lock().unwrap();
        state.checkpoint_failures = times;
        state.checkpoint_error = Some(error);
    }

    pub fn staging_rows(&self) -> Vec<Transaction> {
        let state = self.state.lock().unwrap();
        state.staging.iter().map(|(_, row)| row.clone()).collect()
    }

    pub fn production_len(&self) -> usize {
        self.state.lock().unwrap().production.len()
    }

    pub fn production_rows_for(&self, account_id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .production
            .values()
            .filter(|row| row.account_id == account_id)
            .count()
    }

    pub fn checkpoint(&self, account_id: &str) -> Option<AccountCheckpoint> {
        self.state
            .lock()
            .unwrap()
            .checkpoints
            .get(account_id)
            .cloned()
    }

    pub fn instrument(&self, instrument_id: &str) -> Option<Instrument> {
        self.state
            .lock()
            .unwrap()
            .instruments
            .get(instrument_id)
            .cloned()
    }

    pub fn merge_attempts(&self) -> usize {
        self.state.lock().unwrap().merge_attempts
    }

    pub fn cursor(&self) -> CursorState {
        self.state.lock().unwrap().cursor.clone()
    }
}

#[async_trait]
impl TransactionRepositoryTrait for MemoryStore {
    fn landed_versions(&self, keys: &[String]) -> Result<HashMap<String, LandedVersion>> {
        let state = self.state.lock().unwrap();
        let wanted: HashSet<&String> = keys.iter().collect();
        let mut versions: HashMap<String, LandedVersion> = HashMap::new();
        let landed = state
            .production
            .values()
            .chain(state.staging.iter().map(|(_, row)| row));
        for row in landed.filter(|row| wanted.contains(&row.idempotency_key)) {
            let version = LandedVersion::of(row);
            let merged = match versions.remove(&row.idempotency_key) {
                Some(existing) => existing.newest(version),
                None => version,
            };
            versions.insert(row.idempotency_key.clone(), merged);
        }
        Ok(versions)
    }

    fn count_account_rows(&self, account_id: &str) -> Result<i64> {
        let state = self.state.lock().unwrap();
        let keys: HashSet<&String> = state
            .production
            .values()
            .chain(state.staging.iter().map(|(_, row)| row))
            .filter(|row| row.account_id == account_id)
            .map(|row| &row.idempotency_key)
            .collect();
        Ok(keys.len() as i64)
    }

    fn max_landed_occurred_at(&self) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.lock().unwrap();
        Ok(state.production.values().map(|row| row.occurred_at).max())
    }

    fn staging_row_count(&self) -> Result<i64> {
        Ok(self.state.lock().unwrap().staging.len() as i64)
    }

    fn production_row_count(&self) -> Result<i64> {
        Ok(self.state.lock().unwrap().production.len() as i64)
    }

    async fn append_staging(&self, batch_id: String, rows: Vec<Transaction>) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let count = rows.len();
        state
            .staging
            .extend(rows.into_iter().map(|row| (batch_id.clone(), row)));
        Ok(count)
    }

    async fn merge_staging(&self, scope: CompactionScope) -> Result<MergeOutcome> {
        let mut state = self.state.lock().unwrap();
        state.merge_attempts += 1;

        let mut latest: HashMap<String, Transaction> = HashMap::new();
        let mut staged_rows = 0;
        for (batch_id, row) in state.staging.iter() {
            if !in_scope(&scope, batch_id, row) {
                continue;
            }
            staged_rows += 1;
            let replace = latest
                .get(&row.idempotency_key)
                .map(|existing| row.supersedes(existing))
                .unwrap_or(true);
            if replace {
                latest.insert(row.idempotency_key.clone(), row.clone());
            }
        }
        if staged_rows == 0 {
            return Ok(MergeOutcome::default());
        }

        let partitions: HashSet<NaiveDate> =
            latest.values().map(|row| row.partition_day()).collect();
        if let Some(quota) = state.partition_quota {
            if state.partition_writes + partitions.len() > quota {
                return Err(Error::QuotaExceeded(format!(
                    "{} partition writes used of {}",
                    state.partition_writes, quota
                )));
            }
        }

        let mut rows_merged = 0;
        for (key, row) in latest {
            let write = state
                .production
                .get(&key)
                .map(|existing| row.supersedes(existing))
                .unwrap_or(true);
            if write {
                state.production.insert(key, row);
                rows_merged += 1;
            }
        }
        state.partition_writes += partitions.len();
        state
            .staging
            .retain(|(batch_id, row)| !in_scope(&scope, batch_id, row));

        Ok(MergeOutcome {
            staged_rows,
            rows_merged,
            partitions_touched: partitions.len(),
        })
    }
}

#[async_trait]
impl CheckpointRepositoryTrait for MemoryStore {
    fn get_checkpoint(&self, account_id: &str) -> Result<Option<AccountCheckpoint>> {
        Ok(self.checkpoint(account_id))
    }

    fn summarize_checkpoints(&self, run_id: &str) -> Result<CheckpointSummary> {
        let state = self.state.lock().unwrap();
        let mut summary = CheckpointSummary::default();
        for checkpoint in state.checkpoints.values().filter(|c| c.run_id == run_id) {
            if checkpoint.succeeded {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
        }
        Ok(summary)
    }

    async fn upsert_checkpoint(&self, checkpoint: AccountCheckpoint) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.checkpoint_failures > 0 {
            state.checkpoint_failures -= 1;
            if let Some(error) = state.checkpoint_error {
                return Err(error());
            }
        }
        state
            .checkpoints
            .insert(checkpoint.account_id.clone(), checkpoint);
        Ok(())
    }
}

#[async_trait]
impl CursorRepositoryTrait for MemoryStore {
    fn get_cursor_state(&self) -> Result<CursorState> {
        Ok(self.cursor())
    }

    async fn begin_run(&self, run: ActiveRun) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.cursor.active_run = Some(run);
        state.cursor.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn complete_run(&self, cursor: DateTime<Utc>, stats: RunStats) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let started_at = state.cursor.active_run.take().map(|run| run.started_at);
        state.cursor.cursor = Some(cursor);
        state.cursor.last_run_started_at = started_at;
        state.cursor.last_run = Some(stats);
        state.cursor.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn abandon_run(&self) -> Result<()> {
        self.state.lock().unwrap().cursor.active_run = None;
        Ok(())
    }
}

#[async_trait]
impl ReferenceRepositoryTrait for MemoryStore {
    fn instrument_statuses(
        &self,
        instrument_ids: &[String],
    ) -> Result<HashMap<String, InstrumentStatus>> {
        let state = self.state.lock().unwrap();
        Ok(instrument_ids
            .iter()
            .filter_map(|id| {
                state
                    .instruments
                    .get(id)
                    .map(|i| (id.clone(), i.status.clone()))
            })
            .collect())
    }

    fn open_instrument_ids(&self) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .instruments
            .values()
            .filter(|i| i.status == InstrumentStatus::Open)
            .map(|i| i.instrument_id.clone())
            .collect())
    }

    fn orphaned_instrument_ids(&self) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        let orphaned: HashSet<String> = state
            .production
            .values()
            .chain(state.staging.iter().map(|(_, row)| row))
            .filter_map(|row| row.instrument_id.clone())
            .filter(|id| !state.instruments.contains_key(id))
            .collect();
        Ok(orphaned.into_iter().collect())
    }

    async fn upsert_instruments(&self, instruments: Vec<Instrument>) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let count = instruments.len();
        for mut instrument in instruments {
            if let Some(existing) = state.instruments.get(&instrument.instrument_id) {
                if existing.status.is_terminal() && !instrument.status.is_terminal() {
                    instrument.status = existing.status.clone();
                }
            }
            state
                .instruments
                .insert(instrument.instrument_id.clone(), instrument);
        }
        Ok(count)
    }

    async fn upsert_groupings(&self, groupings: Vec<Grouping>) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let count = groupings.len();
        for grouping in groupings {
            state.groupings.insert(grouping.grouping_id.clone(), grouping);
        }
        Ok(count)
    }
}

impl AccountDirectory for MemoryStore {
    fn list_accounts(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().accounts.clone())
    }
}

/// Emulates the upstream over a fixed per-account history.
///
/// Offsets are honored up to `token_after`; past it the source hands out
/// continuation tokens of the form `tok:<offset>`.
pub struct HistorySource {
    token_after: u32,
    histories: Mutex<HashMap<String, Vec<SourceTransaction>>>,
    requests: Mutex<Vec<PageRequest>>,
    failing: Mutex<HashMap<String, fn() -> Error>>,
}

impl HistorySource {
    pub fn new(token_after: u32) -> Self {
        Self {
            token_after,
            histories: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            failing: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_history(&self, account_id: &str, records: Vec<SourceTransaction>) {
        self.histories
            .lock()
            .unwrap()
            .insert(account_id.to_string(), records);
    }

    pub fn fail_account(&self, account_id: &str, error: fn() -> Error) {
        self.failing
            .lock()
            .unwrap()
            .insert(account_id.to_string(), error);
    }

    pub fn heal_account(&self, account_id: &str) {
        self.failing.lock().unwrap().remove(account_id);
    }

    pub fn cursors(&self, account_id: &str) -> Vec<PageCursor> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.account_id == account_id)
            .map(|r| r.cursor.clone())
            .collect()
    }

    pub fn request_count(&self, account_id: &str) -> usize {
        self.cursors(account_id).len()
    }
}

#[async_trait]
impl TransactionSource for HistorySource {
    async fn fetch_page(&self, request: &PageRequest) -> Result<TransactionPage> {
        self.requests.lock().unwrap().push(request.clone());
        tokio::task::yield_now().await;
        if let Some(error) = self.failing.lock().unwrap().get(&request.account_id) {
            return Err(error());
        }

        let since = request.since.map(|s| s.timestamp());
        let history: Vec<SourceTransaction> = self
            .histories
            .lock()
            .unwrap()
            .get(&request.account_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|r| match (since, r.occurred_at) {
                (Some(since), Some(at)) => at >= since,
                _ => true,
            })
            .collect();

        let offset = match &request.cursor {
            PageCursor::Offset(offset) => *offset as usize,
            PageCursor::Token(token) => token
                .strip_prefix("tok:")
                .and_then(|v| v.parse::<usize>().ok())
                .ok_or_else(|| Error::network(Some(400), "bad continuation token"))?,
        };
        let end = (offset + request.limit as usize).min(history.len());
        let records = history.get(offset..end).map(|s| s.to_vec()).unwrap_or_default();
        let has_more = end < history.len();
        let continuation_token = (has_more && end > self.token_after as usize)
            .then(|| format!("tok:{}", end));

        Ok(TransactionPage {
            records,
            has_more,
            continuation_token,
        })
    }
}

/// Replays a fixed list of responses.
pub struct ScriptedSource {
    responses: Mutex<VecDeque<Result<TransactionPage>>>,
    requests: Mutex<Vec<PageRequest>>,
}

impl ScriptedSource {
    pub fn new(responses: Vec<Result<TransactionPage>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl TransactionSource for ScriptedSource {
    async fn fetch_page(&self, request: &PageRequest) -> Result<TransactionPage> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(TransactionPage::default()))
    }
}

/// Serves instruments from a fixed catalog and records every lookup.
pub struct MemoryReferenceSource {
    catalog: HashMap<String, Instrument>,
    requests: Mutex<Vec<Vec<String>>>,
    failures_left: Mutex<usize>,
}

impl MemoryReferenceSource {
    pub fn with(instruments: Vec<Instrument>) -> Self {
        Self {
            catalog: instruments
                .into_iter()
                .map(|i| (i.instrument_id.clone(), i))
                .collect(),
            requests: Mutex::new(Vec::new()),
            failures_left: Mutex::new(0),
        }
    }

    pub fn fail_next(&self, times: usize) {
        *self.failures_left.lock().unwrap() = times;
    }

    pub fn times_requested(&self, instrument_id: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|batch| batch.iter().any(|id| id == instrument_id))
            .count()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.requests.lock().unwrap().iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl ReferenceSource for MemoryReferenceSource {
    fn max_batch_size(&self) -> usize {
        100
    }

    async fn fetch_instruments(&self, instrument_ids: &[String]) -> Result<Vec<Instrument>> {
        {
            let mut failures_left = self.failures_left.lock().unwrap();
            if *failures_left > 0 {
                *failures_left -= 1;
                return Err(Error::network(Some(503), "unavailable"));
            }
        }
        self.requests.lock().unwrap().push(instrument_ids.to_vec());
        tokio::task::yield_now().await;
        Ok(instrument_ids
            .iter()
            .filter_map(|id| self.catalog.get(id).cloned())
            .collect())
    }
}
