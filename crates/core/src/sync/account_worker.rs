//! Fetch, land and checkpoint one account.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use super::cursor_pager::CursorPager;
use super::run_context::RunContext;
use super::sync_run_model::{AccountOutcome, AccountState};
use crate::errors::{Error, Result};
use crate::transactions::SourceTransaction;

fn transition(outcome: &mut AccountOutcome, next: AccountState) {
    debug!(
        "Account {}: {} -> {}",
        outcome.account_id,
        outcome.state.as_str(),
        next.as_str()
    );
    outcome.state = next;
}

/// Runs one account through fetch, land and checkpoint.
///
/// Account-level failures come back as an outcome in the `Failed` state.
/// An `Err` means the whole run must stop.
pub async fn process_account(ctx: Arc<RunContext>, account_id: String) -> Result<AccountOutcome> {
    let mut outcome = AccountOutcome::new(account_id.clone());
    let config = &ctx.config;
    let mut staged_since_dedicated = 0usize;

    transition(&mut outcome, AccountState::Fetching);
    let since = match ctx.checkpoints.since_for(&account_id, ctx.run.since) {
        Ok(since) => since,
        Err(err) => return fail(&ctx, outcome, AccountState::Fetching, ctx.run.since, err).await,
    };
    let mut pager = CursorPager::new(
        Arc::clone(&ctx.source),
        account_id.clone(),
        since,
        config.page_size,
        config.offset_limit,
    );

    let mut buffer: Vec<SourceTransaction> = Vec::new();
    loop {
        match pager.next_page().await {
            Ok(Some(records)) => {
                outcome.records_fetched += records.len();
                buffer.extend(records);
                if buffer.len() >= config.land_chunk_size {
                    let chunk = std::mem::take(&mut buffer);
                    if let Err(err) =
                        land_chunk(&ctx, &mut outcome, chunk, &mut staged_since_dedicated).await
                    {
                        outcome.pages_fetched = pager.pages_fetched();
                        return fail(&ctx, outcome, AccountState::Landing, since, err).await;
                    }
                    transition(&mut outcome, AccountState::Fetching);
                }
            }
            Ok(None) => break,
            Err(err) => {
                outcome.pages_fetched = pager.pages_fetched();
                return fail(&ctx, outcome, AccountState::Fetching, since, err).await;
            }
        }
    }
    outcome.pages_fetched = pager.pages_fetched();

    if !buffer.is_empty() {
        if let Err(err) = land_chunk(&ctx, &mut outcome, buffer, &mut staged_since_dedicated).await
        {
            return fail(&ctx, outcome, AccountState::Landing, since, err).await;
        }
    }

    transition(&mut outcome, AccountState::Checkpointing);
    ctx.checkpoints
        .mark_complete(&account_id, outcome.landing.new_records as i64, true)
        .await?;
    transition(&mut outcome, AccountState::Done);

    info!(
        "Account {} done: {} fetched, {} new, {} already landed, {} invalid",
        account_id,
        outcome.records_fetched,
        outcome.landing.new_records,
        outcome.landing.already_landed,
        outcome.landing.invalid
    );
    Ok(outcome)
}

async fn land_chunk(
    ctx: &RunContext,
    outcome: &mut AccountOutcome,
    chunk: Vec<SourceTransaction>,
    staged_since_dedicated: &mut usize,
) -> Result<()> {
    transition(outcome, AccountState::Landing);
    let landed = ctx.lander.land(&outcome.account_id, chunk).await?;
    let staged = landed.staged;
    ctx.note_references(&landed.instrument_ids).await;
    outcome.absorb(landed);

    if !ctx.config.use_staging {
        return Ok(());
    }
    ctx.note_staged(staged);
    *staged_since_dedicated += staged;

    if *staged_since_dedicated >= ctx.config.large_account_threshold {
        info!(
            "Account {} staged {} rows; running a dedicated compaction",
            outcome.account_id, staged_since_dedicated
        );
        ctx.compact_account(&outcome.account_id)
            .await
            .map_err(|err| Error::aborted("compacting", Some(outcome.account_id.clone()), &err))?;
        outcome.dedicated_compactions += 1;
        *staged_since_dedicated = 0;
    } else {
        ctx.compact_if_batch_full()
            .await
            .map_err(|err| Error::aborted("compacting", Some(outcome.account_id.clone()), &err))?;
    }
    Ok(())
}

async fn fail(
    ctx: &RunContext,
    mut outcome: AccountOutcome,
    stage: AccountState,
    since: Option<DateTime<Utc>>,
    err: Error,
) -> Result<AccountOutcome> {
    if err.is_fatal_for_run() {
        return Err(match err {
            Error::RunAborted { .. } => err,
            other => Error::aborted(stage.as_str(), Some(outcome.account_id.clone()), &other),
        });
    }

    warn!(
        "Account {} failed while {}: {}",
        outcome.account_id,
        stage.as_str(),
        err
    );
    let message = err.to_string();
    ctx.checkpoints
        .mark_failed(&outcome.account_id, stage.as_str(), &message, since)
        .await?;
    transition(&mut outcome, AccountState::Failed);
    outcome.failed_stage = Some(stage);
    outcome.error = Some(message);
    Ok(outcome)
}
