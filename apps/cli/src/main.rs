mod args;
mod context;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tradesync_core::checkpoints::{CheckpointRepositoryTrait, CursorRepositoryTrait};
use tradesync_core::sync::{RunOptions, SyncServiceTrait};
use tradesync_core::transactions::{AccountDirectory, TransactionRepositoryTrait};
use tracing::info;
use tracing_subscriber::EnvFilter;

use args::{AccountsCommand, Cli, Command, SyncArgs};
use context::StoreContext;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Sync(args) => run_sync(&cli.db, args).await,
        Command::Status => print_status(&cli.db),
        Command::Accounts { command } => manage_accounts(&cli.db, command).await,
    }
}

async fn run_sync(db: &str, args: SyncArgs) -> Result<()> {
    let config = args.to_config().context("invalid sync configuration")?;
    let store = StoreContext::open(db, args.partition_write_quota)
        .with_context(|| format!("failed to open database at {}", db))?;
    let orchestrator = store.orchestrator(config, &args.api_url, args.api_key.clone());

    let summary = orchestrator
        .run(RunOptions {
            new_run: args.new_run,
        })
        .await
        .context("sync aborted")?;

    info!(
        "Run {} finished: {} accounts done, {} failed, {} new records",
        summary.run_id,
        summary.accounts_done,
        summary.failures.len(),
        summary.records_new
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn print_status(db: &str) -> Result<()> {
    let store = StoreContext::open(db, None)
        .with_context(|| format!("failed to open database at {}", db))?;
    let cursor = store.cursor.get_cursor_state()?;
    let window = match &cursor.active_run {
        Some(run) => Some(store.checkpoints.summarize_checkpoints(&run.run_id)?),
        None => None,
    };

    let status = json!({
        "cursor": cursor.cursor,
        "activeRun": cursor.active_run,
        "activeRunCheckpoints": window,
        "lastRunStartedAt": cursor.last_run_started_at,
        "lastRun": cursor.last_run,
        "checkpoints": store.checkpoints.count_all()?,
        "trackedAccounts": store.accounts.list_accounts()?.len(),
        "stagingRows": store.transactions.staging_row_count()?,
        "productionRows": store.transactions.production_row_count()?,
        "instruments": store.references.instrument_count()?,
        "partitionWritesToday": store.transactions.partition_writes_today()?,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn manage_accounts(db: &str, command: AccountsCommand) -> Result<()> {
    let store = StoreContext::open(db, None)
        .with_context(|| format!("failed to open database at {}", db))?;
    match command {
        AccountsCommand::Add { accounts } => {
            let added = store.accounts.register_accounts(accounts).await?;
            println!("Added {} accounts", added);
        }
        AccountsCommand::Remove { accounts } => {
            let removed = store.accounts.remove_accounts(accounts).await?;
            println!("Removed {} accounts", removed);
        }
        AccountsCommand::List => {
            for account in store.accounts.list_accounts()? {
                println!("{}", account);
            }
        }
    }
    Ok(())
}
