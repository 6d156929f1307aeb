//! The ingestion engine: paging, landing, compaction, reference
//! resolution and the orchestrating state machine.

mod account_worker;
mod compactor;
mod cursor_pager;
mod cursor_reconciler;
mod reference_resolver;
mod run_context;
mod staging_lander;
mod sync_orchestrator;
mod sync_run_model;

#[cfg(test)]
pub(crate) mod test_support;

pub use compactor::Compactor;
pub use cursor_pager::CursorPager;
pub use cursor_reconciler::{reconcile_since, SinceDecision, SinceReason};
pub use reference_resolver::{ReferenceResolver, ResolveOutcome};
pub use run_context::RunContext;
pub use staging_lander::{LandOutcome, StagingLander};
pub use sync_orchestrator::{
    normalize_accounts, RunOptions, SyncDependencies, SyncOrchestrator, SyncServiceTrait,
};
pub use sync_run_model::{AccountFailure, AccountOutcome, AccountState, RunSummary};
