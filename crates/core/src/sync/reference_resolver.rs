//! Fetches and lands the instruments referenced by landed transactions.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::errors::Result;
use crate::references::{groupings_from_instruments, ReferenceRepositoryTrait, ReferenceSource};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveOutcome {
    /// Ids sent to the upstream.
    pub requested: usize,
    /// Ids skipped because they are landed with a terminal status.
    pub skipped_terminal: usize,
    /// Ids already resolved earlier in this run.
    pub skipped_resolved: usize,
    pub instruments_landed: usize,
    pub groupings_landed: usize,
    /// Requested ids the upstream did not return.
    pub missing: usize,
    pub failed_batches: usize,
}

impl ResolveOutcome {
    pub fn absorb(&mut self, other: ResolveOutcome) {
        self.requested += other.requested;
        self.skipped_terminal += other.skipped_terminal;
        self.skipped_resolved += other.skipped_resolved;
        self.instruments_landed += other.instruments_landed;
        self.groupings_landed += other.groupings_landed;
        self.missing += other.missing;
        self.failed_batches += other.failed_batches;
    }
}

/// Resolves foreign keys at most once per run, across concurrent callers.
pub struct ReferenceResolver {
    source: Arc<dyn ReferenceSource>,
    repository: Arc<dyn ReferenceRepositoryTrait>,
    retry: RetryPolicy,
    batch_size: usize,
    resolved: Mutex<HashSet<String>>,
}

impl ReferenceResolver {
    pub fn new(
        source: Arc<dyn ReferenceSource>,
        repository: Arc<dyn ReferenceRepositoryTrait>,
        retry: RetryPolicy,
        batch_size: usize,
    ) -> Self {
        let batch_size = batch_size.min(source.max_batch_size()).max(1);
        Self {
            source,
            repository,
            retry,
            batch_size,
            resolved: Mutex::new(HashSet::new()),
        }
    }

    /// Open instruments and instruments referenced but never landed.
    pub fn refresh_candidates(&self) -> Result<HashSet<String>> {
        let mut candidates: HashSet<String> =
            self.repository.open_instrument_ids()?.into_iter().collect();
        candidates.extend(self.repository.orphaned_instrument_ids()?);
        Ok(candidates)
    }

    pub async fn resolve(&self, foreign_keys: HashSet<String>) -> Result<ResolveOutcome> {
        let mut outcome = ResolveOutcome::default();
        let ids: Vec<String> = foreign_keys
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        if ids.is_empty() {
            return Ok(outcome);
        }

        let statuses = self.repository.instrument_statuses(&ids)?;
        let mut to_claim = Vec::with_capacity(ids.len());
        for id in ids {
            match statuses.get(&id) {
                Some(status) if status.is_terminal() => outcome.skipped_terminal += 1,
                _ => to_claim.push(id),
            }
        }

        let mut claimed = Vec::with_capacity(to_claim.len());
        {
            let mut resolved = self.resolved.lock().await;
            for id in to_claim {
                if resolved.insert(id.clone()) {
                    claimed.push(id);
                } else {
                    outcome.skipped_resolved += 1;
                }
            }
        }
        claimed.sort();

        for chunk in claimed.chunks(self.batch_size) {
            outcome.requested += chunk.len();
            let fetched = self
                .retry
                .run("Instrument lookup", || {
                    let source = Arc::clone(&self.source);
                    let ids = chunk.to_vec();
                    async move { source.fetch_instruments(&ids).await }
                })
                .await;

            let instruments = match fetched {
                Ok(instruments) => instruments,
                Err(err) => {
                    warn!(
                        "Instrument lookup for {} ids failed, will retry later: {}",
                        chunk.len(),
                        err
                    );
                    outcome.failed_batches += 1;
                    let mut resolved = self.resolved.lock().await;
                    for id in chunk {
                        resolved.remove(id);
                    }
                    continue;
                }
            };

            let requested: HashSet<&str> = chunk.iter().map(String::as_str).collect();
            let instruments: Vec<_> = instruments
                .into_iter()
                .filter(|i| requested.contains(i.instrument_id.as_str()))
                .collect();
            outcome.missing += chunk.len().saturating_sub(instruments.len());
            if instruments.is_empty() {
                continue;
            }

            let groupings = groupings_from_instruments(&instruments);
            outcome.instruments_landed += self
                .retry
                .run("Instrument upsert", || {
                    let repository = Arc::clone(&self.repository);
                    let instruments = instruments.clone();
                    async move { repository.upsert_instruments(instruments).await }
                })
                .await?;
            if !groupings.is_empty() {
                outcome.groupings_landed += self
                    .retry
                    .run("Grouping upsert", || {
                        let repository = Arc::clone(&self.repository);
                        let groupings = groupings.clone();
                        async move { repository.upsert_groupings(groupings).await }
                    })
                    .await?;
            }
            debug!(
                "Resolved {} of {} instruments in batch",
                instruments.len(),
                chunk.len()
            );
        }

        if outcome.requested > 0 {
            info!(
                "Reference resolution: {} requested, {} landed, {} groupings, {} missing",
                outcome.requested,
                outcome.instruments_landed,
                outcome.groupings_landed,
                outcome.missing
            );
        }
        Ok(outcome)
    }
}
