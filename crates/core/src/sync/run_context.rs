//! State shared by the workers of one sync run.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::compactor::Compactor;
use super::reference_resolver::ReferenceResolver;
use super::staging_lander::StagingLander;
use crate::checkpoints::{ActiveRun, CheckpointStore};
use crate::config::{CompactionMode, SyncConfig};
use crate::errors::Result;
use crate::transactions::{CompactionScope, MergeOutcome, TransactionSource};

pub struct RunContext {
    pub run: ActiveRun,
    pub config: SyncConfig,
    pub source: Arc<dyn TransactionSource>,
    pub checkpoints: CheckpointStore,
    pub lander: StagingLander,
    pub compactor: Compactor,
    pub resolver: ReferenceResolver,
    discovered_references: Mutex<HashSet<String>>,
    staged_since_compaction: AtomicUsize,
    compaction_lock: Mutex<()>,
    compactions: AtomicUsize,
    rows_merged: AtomicUsize,
}

impl RunContext {
    pub fn new(
        run: ActiveRun,
        config: SyncConfig,
        source: Arc<dyn TransactionSource>,
        checkpoints: CheckpointStore,
        lander: StagingLander,
        compactor: Compactor,
        resolver: ReferenceResolver,
    ) -> Self {
        Self {
            run,
            config,
            source,
            checkpoints,
            lander,
            compactor,
            resolver,
            discovered_references: Mutex::new(HashSet::new()),
            staged_since_compaction: AtomicUsize::new(0),
            compaction_lock: Mutex::new(()),
            compactions: AtomicUsize::new(0),
            rows_merged: AtomicUsize::new(0),
        }
    }

    pub async fn note_references(&self, instrument_ids: &HashSet<String>) {
        if instrument_ids.is_empty() {
            return;
        }
        let mut discovered = self.discovered_references.lock().await;
        discovered.extend(instrument_ids.iter().cloned());
    }

    pub async fn take_references(&self) -> HashSet<String> {
        std::mem::take(&mut *self.discovered_references.lock().await)
    }

    /// Counts freshly staged rows toward the next batch compaction.
    pub fn note_staged(&self, rows: usize) {
        if self.config.use_staging && rows > 0 {
            self.staged_since_compaction
                .fetch_add(rows, Ordering::SeqCst);
        }
    }

    fn note_compacted(&self, outcome: &MergeOutcome) {
        self.compactions.fetch_add(1, Ordering::SeqCst);
        self.rows_merged
            .fetch_add(outcome.rows_merged, Ordering::SeqCst);
        let _ = self.staged_since_compaction.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |staged| Some(staged.saturating_sub(outcome.staged_rows)),
        );
    }

    pub fn compactions(&self) -> usize {
        self.compactions.load(Ordering::SeqCst)
    }

    /// Production rows written by compactions of this run.
    pub fn rows_merged(&self) -> usize {
        self.rows_merged.load(Ordering::SeqCst)
    }

    /// Runs a full compaction when per-batch mode has staged enough rows.
    pub async fn compact_if_batch_full(&self) -> Result<Option<MergeOutcome>> {
        if !self.config.use_staging || self.config.compaction_mode != CompactionMode::PerBatch {
            return Ok(None);
        }
        if !self.batch_full() {
            return Ok(None);
        }
        let _guard = self.compaction_lock.lock().await;
        if !self.batch_full() {
            return Ok(None);
        }
        let outcome = self.compactor.compact(CompactionScope::All).await?;
        self.note_compacted(&outcome);
        Ok(Some(outcome))
    }

    fn batch_full(&self) -> bool {
        self.staged_since_compaction.load(Ordering::SeqCst) >= self.config.compaction_batch_size
    }

    /// Dedicated compaction of one account's staged rows.
    pub async fn compact_account(&self, account_id: &str) -> Result<MergeOutcome> {
        let _guard = self.compaction_lock.lock().await;
        let outcome = self
            .compactor
            .compact(CompactionScope::Accounts(vec![account_id.to_string()]))
            .await?;
        self.note_compacted(&outcome);
        Ok(outcome)
    }

    /// Final compaction of whatever is left in staging.
    pub async fn compact_remaining(&self) -> Result<Option<MergeOutcome>> {
        let _guard = self.compaction_lock.lock().await;
        if self.compactor.staging_row_count()? == 0 {
            return Ok(None);
        }
        let outcome = self.compactor.compact(CompactionScope::All).await?;
        self.note_compacted(&outcome);
        Ok(Some(outcome))
    }
}
