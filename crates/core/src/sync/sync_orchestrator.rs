//! Runs a sync: discover accounts, fetch them with bounded concurrency,
//! resolve references, compact, and advance the cursor.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::account_worker::process_account;
use super::compactor::Compactor;
use super::cursor_reconciler::reconcile_since;
use super::reference_resolver::ReferenceResolver;
use super::run_context::RunContext;
use super::staging_lander::StagingLander;
use super::sync_run_model::RunSummary;
use crate::checkpoints::{
    ActiveRun, CheckpointRepositoryTrait, CheckpointStore, CursorRepositoryTrait, RunStats,
};
use crate::config::SyncConfig;
use crate::errors::{Error, Result};
use crate::references::{ReferenceRepositoryTrait, ReferenceSource};
use crate::transactions::{AccountDirectory, TransactionRepositoryTrait, TransactionSource};

/// Collaborators of the orchestrator.
#[derive(Clone)]
pub struct SyncDependencies {
    pub transaction_source: Arc<dyn TransactionSource>,
    pub reference_source: Arc<dyn ReferenceSource>,
    pub transactions: Arc<dyn TransactionRepositoryTrait>,
    pub references: Arc<dyn ReferenceRepositoryTrait>,
    pub checkpoints: Arc<dyn CheckpointRepositoryTrait>,
    pub cursor: Arc<dyn CursorRepositoryTrait>,
    pub accounts: Arc<dyn AccountDirectory>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Abandon an open run window instead of resuming it.
    pub new_run: bool,
}

#[async_trait]
pub trait SyncServiceTrait: Send + Sync {
    async fn run(&self, options: RunOptions) -> Result<RunSummary>;
}

pub struct SyncOrchestrator {
    config: SyncConfig,
    deps: SyncDependencies,
}

/// Lowercases, trims and dedups account ids, keeping a stable order.
pub fn normalize_accounts<I, S>(accounts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    accounts
        .into_iter()
        .map(|a| a.as_ref().trim().to_ascii_lowercase())
        .filter(|a| !a.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl SyncOrchestrator {
    pub fn new(config: SyncConfig, deps: SyncDependencies) -> Self {
        Self { config, deps }
    }

    fn discover_accounts(&self) -> Result<Vec<String>> {
        let mut accounts = match &self.config.account_allow_list {
            Some(allow_list) => normalize_accounts(allow_list),
            None => normalize_accounts(self.deps.accounts.list_accounts()?),
        };
        if let Some(limit) = self.config.account_limit {
            if accounts.len() > limit {
                info!("Limiting run to {} of {} accounts", limit, accounts.len());
                accounts.truncate(limit);
            }
        }
        Ok(accounts)
    }

    /// Resumes the open run window or opens a new one.
    async fn open_run(&self, options: &RunOptions, summary: &mut RunSummary) -> Result<ActiveRun> {
        let state = self.deps.cursor.get_cursor_state()?;
        if let Some(active) = state.active_run {
            if !options.new_run {
                info!(
                    "Resuming run {} started at {} (since {:?})",
                    active.run_id, active.started_at, active.since
                );
                summary.resumed = true;
                return Ok(active);
            }
            warn!("Abandoning open run {}", active.run_id);
            self.deps.cursor.abandon_run().await?;
        }

        let now = Utc::now();
        let decision = reconcile_since(
            state.cursor,
            self.deps.transactions.max_landed_occurred_at()?,
            now,
            self.config.default_lookback,
            self.config.cursor_drift_tolerance,
            self.config.full_backfill,
        );
        summary.since_reason = Some(decision.reason);
        let run = ActiveRun {
            run_id: Uuid::now_v7().to_string(),
            since: decision.since,
            started_at: now,
        };
        self.deps.cursor.begin_run(run.clone()).await?;
        info!(
            "Opened run {} since {:?} ({:?})",
            run.run_id, run.since, decision.reason
        );
        Ok(run)
    }

    fn context(&self, run: ActiveRun) -> RunContext {
        let retry = self.config.retry_policy();
        let checkpoints = CheckpointStore::new(
            Arc::clone(&self.deps.checkpoints),
            Arc::clone(&self.deps.transactions),
            retry.clone(),
            run.run_id.clone(),
            self.config.verify_checkpoints,
        );
        let lander = StagingLander::new(
            Arc::clone(&self.deps.transactions),
            retry.clone(),
            self.config.use_staging,
        );
        let compactor = Compactor::new(Arc::clone(&self.deps.transactions), retry.clone());
        let resolver = ReferenceResolver::new(
            Arc::clone(&self.deps.reference_source),
            Arc::clone(&self.deps.references),
            retry,
            self.config.reference_batch_size,
        );
        RunContext::new(
            run,
            self.config.clone(),
            Arc::clone(&self.deps.transaction_source),
            checkpoints,
            lander,
            compactor,
            resolver,
        )
    }

    async fn fetch_all(
        &self,
        ctx: &Arc<RunContext>,
        accounts: Vec<String>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let mut pending = Vec::with_capacity(accounts.len());
        for account_id in accounts {
            if ctx.checkpoints.is_complete(&account_id)? {
                summary.accounts_skipped += 1;
            } else {
                pending.push(account_id);
            }
        }
        info!(
            "{} accounts pending, {} already complete in this run",
            pending.len(),
            summary.accounts_skipped
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut workers = JoinSet::new();
        for account_id in pending {
            let ctx = Arc::clone(ctx);
            let semaphore = Arc::clone(&semaphore);
            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::aborted("scheduling", None, &Error::Config(e.to_string())))?;
                process_account(ctx, account_id).await
            });
        }

        while let Some(joined) = workers.join_next().await {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => {
                    workers.abort_all();
                    return Err(match err {
                        Error::RunAborted { .. } => err,
                        other => Error::aborted("processing accounts", None, &other),
                    });
                }
                Err(join_err) => {
                    workers.abort_all();
                    return Err(Error::RunAborted {
                        stage: "processing accounts".to_string(),
                        account_id: None,
                        message: format!("worker task failed: {}", join_err),
                    });
                }
            };
            summary.record_account(&outcome);
        }
        Ok(())
    }

    async fn resolve_references(&self, ctx: &RunContext, summary: &mut RunSummary) {
        let mut keys = ctx.take_references().await;
        match ctx.resolver.refresh_candidates() {
            Ok(candidates) => keys.extend(candidates),
            Err(err) => warn!("Could not load instruments to refresh: {}", err),
        }
        match ctx.resolver.resolve(keys).await {
            Ok(outcome) => {
                if outcome.failed_batches > 0 {
                    summary.reference_error = Some(format!(
                        "{} instrument lookups failed",
                        outcome.failed_batches
                    ));
                }
                summary.references = outcome;
            }
            Err(err) => {
                error!("Reference resolution failed: {}", err);
                summary.reference_error = Some(err.to_string());
            }
        }
    }
}

#[async_trait]
impl SyncServiceTrait for SyncOrchestrator {
    async fn run(&self, options: RunOptions) -> Result<RunSummary> {
        self.config.validate()?;
        let clock = std::time::Instant::now();
        let mut summary = RunSummary::new(String::new(), Utc::now());

        let run = self.open_run(&options, &mut summary).await?;
        summary.run_id = run.run_id.clone();
        summary.since = run.since;
        summary.started_at = run.started_at;

        let accounts = self.discover_accounts()?;
        summary.accounts_total = accounts.len();
        let ctx = Arc::new(self.context(run.clone()));

        self.fetch_all(&ctx, accounts, &mut summary).await?;
        self.resolve_references(&ctx, &mut summary).await;

        ctx.compact_remaining()
            .await
            .map_err(|err| Error::aborted("compacting", None, &err))?;
        summary.compactions = ctx.compactions();
        summary.rows_merged += ctx.rows_merged();

        summary.finished_at = Utc::now();
        let stats = RunStats {
            duration_ms: clock.elapsed().as_millis() as i64,
            records_landed: summary.records_new as i64,
            instruments_landed: summary.references.instruments_landed as i64,
            groupings_landed: summary.references.groupings_landed as i64,
            accounts_processed: summary.accounts_done as i64,
        };
        self.deps.cursor.complete_run(run.started_at, stats).await?;
        summary.cursor_advanced_to = Some(run.started_at);
        if summary.is_complete() {
            info!(
                "Run {} complete: {} accounts, {} new records, cursor now {}",
                run.run_id, summary.accounts_done, summary.records_new, run.started_at
            );
        } else {
            warn!(
                "Run {} closed with {} failed accounts carried forward{}; cursor now {}",
                run.run_id,
                summary.failures.len(),
                summary
                    .reference_error
                    .as_ref()
                    .map(|e| format!(", references: {}", e))
                    .unwrap_or_default(),
                run.started_at
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompactionMode;
    use crate::checkpoints::AccountCheckpoint;
    use crate::errors::DatabaseError;
    use crate::references::InstrumentStatus;
    use crate::sync::sync_run_model::AccountState;
    use crate::sync::test_support::{
        instrument, raw, transaction, HistorySource, MemoryReferenceSource, MemoryStore,
    };
    use crate::transactions::SourceTransaction;
    use std::time::Duration;

    struct Harness {
        memory: Arc<MemoryStore>,
        source: Arc<HistorySource>,
        references: Arc<MemoryReferenceSource>,
    }

    impl Harness {
        fn new(token_after: u32) -> Self {
            Self {
                memory: Arc::new(MemoryStore::default()),
                source: Arc::new(HistorySource::new(token_after)),
                references: Arc::new(MemoryReferenceSource::with(vec![
                    instrument("m1", Some("e1"), InstrumentStatus::Open),
                    instrument("m2", Some("e1"), InstrumentStatus::Closed),
                ])),
            }
        }

        fn orchestrator(&self, config: SyncConfig) -> SyncOrchestrator {
            SyncOrchestrator::new(
                config,
                SyncDependencies {
                    transaction_source: self.source.clone(),
                    reference_source: self.references.clone(),
                    transactions: self.memory.clone(),
                    references: self.memory.clone(),
                    checkpoints: self.memory.clone(),
                    cursor: self.memory.clone(),
                    accounts: self.memory.clone(),
                },
            )
        }
    }

    fn config() -> SyncConfig {
        SyncConfig {
            retry_base_delay: Duration::ZERO,
            max_retries: 1,
            full_backfill: true,
            ..SyncConfig::default()
        }
    }

    fn history(prefix: &str, count: usize, start: i64) -> Vec<SourceTransaction> {
        (0..count)
            .map(|i| raw(&format!("{}{}", prefix, i), start + i as i64))
            .collect()
    }

    #[tokio::test]
    async fn rerun_over_landed_history_lands_only_new_records() {
        let harness = Harness::new(10_000);
        harness.memory.set_accounts(&["0xA1"]);
        harness.memory.seed_production(
            (0..2500)
                .map(|i| transaction("0xa1", &format!("t{}", i), 1_700_000_000 + i))
                .collect(),
        );
        harness
            .source
            .set_history("0xa1", history("t", 2510, 1_700_000_000));

        let summary = harness
            .orchestrator(config())
            .run(RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.accounts_done, 1);
        assert_eq!(summary.records_fetched, 2510);
        assert_eq!(summary.records_new, 10);
        assert_eq!(harness.memory.production_rows_for("0xa1"), 2510);
        assert_eq!(harness.memory.checkpoint("0xa1").unwrap().record_count, 10);
        assert_eq!(harness.source.request_count("0xa1"), 3);
        assert!(summary.cursor_advanced_to.is_some());
    }

    #[tokio::test]
    async fn shared_instrument_is_fetched_once_across_workers() {
        let harness = Harness::new(10_000);
        harness.memory.set_accounts(&["0xa", "0xb"]);
        harness.source.set_history("0xa", history("a", 20, 100));
        harness.source.set_history("0xb", history("b", 20, 100));

        let summary = harness
            .orchestrator(SyncConfig {
                max_workers: 2,
                ..config()
            })
            .run(RunOptions::default())
            .await
            .unwrap();

        assert_eq!(harness.references.times_requested("m1"), 1);
        assert_eq!(summary.references.instruments_landed, 1);
        assert_eq!(summary.references.groupings_landed, 1);
        assert!(harness.memory.instrument("m1").is_some());
    }

    async fn open_window(harness: &Harness, run_id: &str) -> ActiveRun {
        let run = ActiveRun {
            run_id: run_id.to_string(),
            since: None,
            started_at: Utc::now(),
        };
        harness.memory.begin_run(run.clone()).await.unwrap();
        run
    }

    #[tokio::test]
    async fn interrupted_run_resumes_with_only_the_pending_account() {
        let harness = Harness::new(10_000);
        harness.memory.set_accounts(&["0xa", "0xb"]);
        harness.source.set_history("0xa", history("a", 30, 100));
        harness.source.set_history("0xb", history("b", 40, 100));
        let open = open_window(&harness, "run-interrupted").await;
        harness.memory.seed_production(
            (0..30)
                .map(|i| transaction("0xa", &format!("a{}", i), 100 + i))
                .collect(),
        );
        harness
            .memory
            .upsert_checkpoint(AccountCheckpoint {
                account_id: "0xa".to_string(),
                run_id: open.run_id.clone(),
                completed: true,
                succeeded: true,
                record_count: 30,
                processed_at: Utc::now(),
                failed_stage: None,
                last_error: None,
                pending_since: None,
            })
            .await
            .unwrap();

        let summary = harness
            .orchestrator(config())
            .run(RunOptions::default())
            .await
            .unwrap();

        assert!(summary.resumed);
        assert_eq!(summary.run_id, open.run_id);
        assert_eq!(summary.started_at, open.started_at);
        assert_eq!(summary.accounts_skipped, 1);
        assert_eq!(summary.records_new, 40);
        assert_eq!(harness.source.request_count("0xa"), 0);
        assert_eq!(harness.memory.production_rows_for("0xb"), 40);
        assert_eq!(summary.cursor_advanced_to, Some(open.started_at));
        assert!(harness.memory.cursor().active_run.is_none());
    }

    #[tokio::test]
    async fn failing_account_does_not_hold_back_healthy_accounts() {
        let harness = Harness::new(u32::MAX);
        let base = Utc::now().timestamp() - 600;
        harness.memory.set_accounts(&["0xa", "0xb"]);
        harness.source.set_history("0xa", history("a", 50, base - 300));
        harness.source.set_history("0xb", history("b", 5, base));
        let orchestrator = harness.orchestrator(SyncConfig {
            full_backfill: false,
            page_size: 10,
            offset_limit: 20,
            ..config()
        });

        let first = orchestrator.run(RunOptions::default()).await.unwrap();
        assert_eq!(first.failures.len(), 1);
        assert_eq!(first.cursor_advanced_to, Some(first.started_at));
        assert!(harness.memory.cursor().active_run.is_none());
        assert_eq!(
            harness.memory.checkpoint("0xa").unwrap().pending_since,
            first.since
        );

        harness.source.set_history("0xb", history("b", 15, base));
        let second = orchestrator.run(RunOptions::default()).await.unwrap();

        assert!(!second.resumed);
        assert_ne!(second.run_id, first.run_id);
        assert!(second.since > first.since);
        assert_eq!(second.records_new, 10);
        assert_eq!(harness.memory.production_rows_for("0xb"), 15);
        assert_eq!(second.failures.len(), 1);
        assert_eq!(second.failures[0].account_id, "0xa");
        assert_eq!(harness.memory.cursor().cursor, Some(second.started_at));
        assert_eq!(
            harness.memory.checkpoint("0xa").unwrap().pending_since,
            first.since
        );

        harness.source.set_history("0xa", history("a", 20, base - 300));
        let third = orchestrator.run(RunOptions::default()).await.unwrap();

        assert!(third.failures.is_empty());
        assert_eq!(harness.memory.production_rows_for("0xa"), 20);
        let checkpoint = harness.memory.checkpoint("0xa").unwrap();
        assert!(checkpoint.succeeded);
        assert_eq!(checkpoint.pending_since, None);
    }

    #[tokio::test]
    async fn failed_reference_lookups_do_not_hold_the_window_open() {
        let harness = Harness::new(10_000);
        harness.memory.set_accounts(&["0xa"]);
        harness.source.set_history("0xa", history("a", 5, 100));
        harness.references.fail_next(100);

        let summary = harness
            .orchestrator(config())
            .run(RunOptions::default())
            .await
            .unwrap();

        assert!(summary.reference_error.is_some());
        assert_eq!(summary.cursor_advanced_to, Some(summary.started_at));
        assert!(harness.memory.cursor().active_run.is_none());
        assert_eq!(harness.memory.production_rows_for("0xa"), 5);
    }

    #[tokio::test]
    async fn completed_sync_is_idempotent() {
        let harness = Harness::new(10_000);
        harness.memory.set_accounts(&["0xa"]);
        harness.source.set_history("0xa", history("a", 50, 100));
        let orchestrator = harness.orchestrator(config());

        let first = orchestrator.run(RunOptions::default()).await.unwrap();
        let second = orchestrator.run(RunOptions::default()).await.unwrap();

        assert_ne!(first.run_id, second.run_id);
        assert_eq!(first.records_new, 50);
        assert_eq!(second.records_new, 0);
        assert_eq!(second.records_already_landed, 50);
        assert_eq!(harness.memory.production_len(), 50);
    }

    #[tokio::test]
    async fn pagination_past_offset_limit_without_token_fails_only_that_account() {
        let harness = Harness::new(u32::MAX);
        harness.memory.set_accounts(&["0xa", "0xb"]);
        harness.source.set_history("0xa", history("a", 50, 100));
        harness.source.set_history("0xb", history("b", 15, 100));

        let summary = harness
            .orchestrator(SyncConfig {
                page_size: 10,
                offset_limit: 20,
                ..config()
            })
            .run(RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.accounts_done, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].account_id, "0xa");
        assert_eq!(harness.source.request_count("0xa"), 3);
        assert!(!harness.memory.checkpoint("0xa").unwrap().succeeded);
        assert_eq!(harness.memory.production_rows_for("0xb"), 15);
    }

    #[tokio::test]
    async fn checkpoint_write_failure_aborts_the_run() {
        let harness = Harness::new(10_000);
        harness.memory.set_accounts(&["0xa"]);
        harness.source.set_history("0xa", history("a", 5, 100));
        harness
            .memory
            .fail_checkpoint_writes(100, || Error::Database(DatabaseError::Busy("locked".into())));

        let result = harness
            .orchestrator(config())
            .run(RunOptions::default())
            .await;

        assert!(matches!(result, Err(Error::RunAborted { .. })));
        assert!(harness.memory.cursor().cursor.is_none());
        assert!(harness.memory.cursor().active_run.is_some());
    }

    #[tokio::test]
    async fn persistent_quota_refusal_aborts_without_advancing_cursor() {
        let harness = Harness::new(10_000);
        harness.memory.set_accounts(&["0xa"]);
        harness.memory.set_partition_quota(0);
        harness.source.set_history("0xa", history("a", 5, 100));

        let result = harness
            .orchestrator(SyncConfig {
                compaction_mode: CompactionMode::EndOfRun,
                ..config()
            })
            .run(RunOptions::default())
            .await;

        match result {
            Err(Error::RunAborted { stage, .. }) => assert_eq!(stage, "compacting"),
            other => panic!("expected aborted run, got {:?}", other),
        }
        assert!(harness.memory.cursor().cursor.is_none());
        assert_eq!(harness.memory.staging_rows().len(), 5);
    }

    #[tokio::test]
    async fn large_account_gets_dedicated_compactions() {
        let harness = Harness::new(10_000);
        harness.memory.set_accounts(&["0xa"]);
        harness.source.set_history("0xa", history("a", 25, 100));

        let summary = harness
            .orchestrator(SyncConfig {
                page_size: 10,
                land_chunk_size: 10,
                large_account_threshold: 10,
                compaction_mode: CompactionMode::EndOfRun,
                ..config()
            })
            .run(RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.compactions, 3);
        assert_eq!(summary.rows_merged, 25);
        assert_eq!(harness.memory.production_len(), 25);
        assert!(harness.memory.staging_rows().is_empty());
    }

    #[tokio::test]
    async fn per_batch_mode_compacts_as_rows_accumulate() {
        let harness = Harness::new(10_000);
        harness.memory.set_accounts(&["0xa"]);
        harness.source.set_history("0xa", history("a", 30, 100));

        let summary = harness
            .orchestrator(SyncConfig {
                page_size: 10,
                land_chunk_size: 10,
                compaction_batch_size: 20,
                compaction_mode: CompactionMode::PerBatch,
                ..config()
            })
            .run(RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.compactions, 2);
        assert_eq!(harness.memory.production_len(), 30);
    }

    #[tokio::test]
    async fn direct_write_mode_skips_staging() {
        let harness = Harness::new(10_000);
        harness.memory.set_accounts(&["0xa"]);
        harness.source.set_history("0xa", history("a", 12, 100));

        let summary = harness
            .orchestrator(SyncConfig {
                use_staging: false,
                ..config()
            })
            .run(RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.rows_merged, 12);
        assert_eq!(summary.compactions, 0);
        assert_eq!(harness.memory.production_len(), 12);
    }

    #[tokio::test]
    async fn allow_list_overrides_directory_and_limit_applies() {
        let harness = Harness::new(10_000);
        harness.memory.set_accounts(&["0xdir"]);
        harness.source.set_history("0xb", history("b", 3, 100));
        harness.source.set_history("0xa", history("a", 3, 100));

        let summary = harness
            .orchestrator(SyncConfig {
                account_allow_list: Some(vec![" 0xB ".into(), "0xa".into(), "0xb".into()]),
                account_limit: Some(1),
                ..config()
            })
            .run(RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.accounts_total, 1);
        assert_eq!(harness.source.request_count("0xa"), 1);
        assert_eq!(harness.source.request_count("0xb"), 0);
        assert_eq!(harness.source.request_count("0xdir"), 0);
    }

    #[tokio::test]
    async fn new_run_abandons_open_window() {
        let harness = Harness::new(10_000);
        harness.memory.set_accounts(&["0xa"]);
        harness.source.set_history("0xa", history("a", 3, 100));
        let open = open_window(&harness, "run-abandoned").await;

        let summary = harness
            .orchestrator(config())
            .run(RunOptions { new_run: true })
            .await
            .unwrap();

        assert!(!summary.resumed);
        assert_ne!(summary.run_id, open.run_id);
        assert_eq!(summary.accounts_done, 1);
        assert!(harness.memory.cursor().active_run.is_none());
    }

    #[tokio::test]
    async fn incremental_run_reconciles_since_from_landed_data() {
        let harness = Harness::new(10_000);
        harness.memory.set_accounts(&["0xa"]);
        harness
            .memory
            .seed_production(vec![transaction("0xa", "old", 1_000)]);
        harness.source.set_history("0xa", history("a", 5, 2_000));

        let summary = harness
            .orchestrator(SyncConfig {
                full_backfill: false,
                ..config()
            })
            .run(RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.since.map(|s| s.timestamp()), Some(1_000));
        assert_eq!(summary.records_new, 5);
    }

    #[test]
    fn normalizes_account_lists() {
        assert_eq!(
            normalize_accounts(vec![" 0xB", "0xa", "0XB", ""]),
            vec!["0xa".to_string(), "0xb".to_string()]
        );
    }
}
