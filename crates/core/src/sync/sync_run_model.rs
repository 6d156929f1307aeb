//! Per-account and per-run outcomes of a sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cursor_reconciler::SinceReason;
use super::reference_resolver::ResolveOutcome;
use super::staging_lander::LandOutcome;

/// Lifecycle of one account within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    Pending,
    Fetching,
    Landing,
    Checkpointing,
    Done,
    Failed,
}

impl AccountState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountState::Pending => "pending",
            AccountState::Fetching => "fetching",
            AccountState::Landing => "landing",
            AccountState::Checkpointing => "checkpointing",
            AccountState::Done => "done",
            AccountState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountOutcome {
    pub account_id: String,
    pub state: AccountState,
    pub pages_fetched: usize,
    pub records_fetched: usize,
    pub landing: LandOutcome,
    pub dedicated_compactions: usize,
    pub failed_stage: Option<AccountState>,
    pub error: Option<String>,
}

impl AccountOutcome {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            state: AccountState::Pending,
            pages_fetched: 0,
            records_fetched: 0,
            landing: LandOutcome::default(),
            dedicated_compactions: 0,
            failed_stage: None,
            error: None,
        }
    }

    pub fn absorb(&mut self, landed: LandOutcome) {
        let total = &mut self.landing;
        total.received += landed.received;
        total.invalid += landed.invalid;
        total.collapsed += landed.collapsed;
        total.already_landed += landed.already_landed;
        total.staged += landed.staged;
        total.new_records += landed.new_records;
        total.superseding += landed.superseding;
        total.fallback_keys += landed.fallback_keys;
        total.rows_merged += landed.rows_merged;
        total.instrument_ids.extend(landed.instrument_ids);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountFailure {
    pub account_id: String,
    pub stage: AccountState,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    /// True when an interrupted run window was continued.
    pub resumed: bool,
    pub since: Option<DateTime<Utc>>,
    pub since_reason: Option<SinceReason>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accounts_total: usize,
    /// Accounts already complete in this run window.
    pub accounts_skipped: usize,
    pub accounts_done: usize,
    pub failures: Vec<AccountFailure>,
    pub pages_fetched: usize,
    pub records_fetched: usize,
    pub records_invalid: usize,
    pub records_collapsed: usize,
    pub records_already_landed: usize,
    pub records_staged: usize,
    pub records_new: usize,
    pub records_superseding: usize,
    pub fallback_keys: usize,
    pub compactions: usize,
    pub rows_merged: usize,
    pub references: ResolveOutcome,
    pub reference_error: Option<String>,
    /// Set when the run completed and the cursor moved.
    pub cursor_advanced_to: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            resumed: false,
            since: None,
            since_reason: None,
            started_at,
            finished_at: started_at,
            accounts_total: 0,
            accounts_skipped: 0,
            accounts_done: 0,
            failures: Vec::new(),
            pages_fetched: 0,
            records_fetched: 0,
            records_invalid: 0,
            records_collapsed: 0,
            records_already_landed: 0,
            records_staged: 0,
            records_new: 0,
            records_superseding: 0,
            fallback_keys: 0,
            compactions: 0,
            rows_merged: 0,
            references: ResolveOutcome::default(),
            reference_error: None,
            cursor_advanced_to: None,
        }
    }

    pub fn record_account(&mut self, outcome: &AccountOutcome) {
        self.pages_fetched += outcome.pages_fetched;
        self.records_fetched += outcome.records_fetched;
        self.records_invalid += outcome.landing.invalid;
        self.records_collapsed += outcome.landing.collapsed;
        self.records_already_landed += outcome.landing.already_landed;
        self.records_staged += outcome.landing.staged;
        self.records_new += outcome.landing.new_records;
        self.records_superseding += outcome.landing.superseding;
        self.fallback_keys += outcome.landing.fallback_keys;
        self.rows_merged += outcome.landing.rows_merged;
        match outcome.state {
            AccountState::Done => self.accounts_done += 1,
            _ => self.failures.push(AccountFailure {
                account_id: outcome.account_id.clone(),
                stage: outcome.failed_stage.unwrap_or(outcome.state),
                error: outcome.error.clone().unwrap_or_default(),
            }),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.reference_error.is_none()
    }
}
