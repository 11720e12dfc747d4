use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use nhl_sync::cli::db_counts::{self, DbCountsConfig};
use nhl_sync::cli::open_storage;
use nhl_sync::config::SyncConfig;
use nhl_sync::database_ops::nhl::NhlApiClient;
use nhl_sync::orchestrator::{SyncRequest, SyncRunner};
use nhl_sync::telemetry::{init_tracing, DEFAULT_FILTER};
use nhl_sync::util::env as env_util;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "nhl-sync", version, about = "Sync NHL teams, players, games and box scores into Postgres")]
struct Cli {
    /// Apply database migrations before anything else
    #[arg(long, default_value_t = false)]
    init: bool,
    /// What to sync: teams, players, games, stats or all
    #[arg(long, default_value = "all")]
    sync: String,
    /// Season to sync as 8 digits, e.g. 20222023 (default: current season)
    #[arg(long)]
    season: Option<String>,
    /// Sync games and stats for every season since BACKFILL_START_YEAR
    #[arg(long, default_value_t = false)]
    all_seasons: bool,
    /// After the one-shot run keep syncing on the refresh intervals until Ctrl-C
    #[arg(long, default_value_t = false)]
    daemon: bool,
    /// Write to in-memory storage instead of Postgres
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Print row counts per table and exit
    #[arg(long, default_value_t = false)]
    counts: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_util::init_env();
    if let Err(e) = init_tracing(DEFAULT_FILTER) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }
    match run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %format!("{e:#}"), "nhl-sync failed");
            ExitCode::FAILURE
        }
    }
}

/// `Ok(false)` when the one-shot run did not complete cleanly.
async fn run(cli: Cli) -> Result<bool> {
    // reject bad input before touching the network or the database
    let request = SyncRequest::parse(&cli.sync, cli.season.as_deref(), cli.all_seasons)?;
    let config = SyncConfig::from_env()?;

    env_util::preflight_check(
        "nhl-sync",
        &[],
        &[
            "DATABASE_URL",
            "DB_HOST",
            "DB_NAME",
            "NHL_API_BASE_URL",
            "NHL_SCHEDULE_MODE",
            "BACKFILL_START_YEAR",
        ],
    )?;

    let storage = open_storage(&config, cli.dry_run).await?;

    if cli.init {
        storage.init_schema().await.context("applying migrations")?;
        info!("schema up to date");
    }

    if cli.counts {
        let report = db_counts::run(
            storage.as_ref(),
            DbCountsConfig {
                season: request.season,
            },
        )
        .await?;
        println!("{report}");
        return Ok(true);
    }

    let source = Arc::new(NhlApiClient::new(&config)?);
    let runner = SyncRunner::assemble(&config, source, storage);

    let summary = runner.run_one_shot(request).await?;
    for op in summary.failures() {
        warn!(entity = %op.entity, error = ?op.error, "operation failed");
    }
    info!(status = summary.status.label(), operations = summary.operations.len(), "one-shot run finished");
    let ok = summary.succeeded();

    if cli.daemon {
        runner.start_daemon(request.season)?;
        info!("daemon running; press Ctrl-C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl-C")?;
        info!("shutting down");
        runner.cancel();
        // let in-flight timer tasks observe the cancellation
        tokio::task::yield_now().await;
    }

    Ok(ok)
}
