// HTTP control surface for the NHL sync: trigger, status, cancel, events

use std::sync::Arc;

use anyhow::Result;
use nhl_sync::api::ApiServer;
use nhl_sync::cli::open_storage;
use nhl_sync::config::SyncConfig;
use nhl_sync::database_ops::nhl::NhlApiClient;
use nhl_sync::orchestrator::SyncRunner;
use nhl_sync::telemetry::{init_tracing, DEFAULT_FILTER};
use nhl_sync::util::env as env_util;

#[actix_web::main]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing(DEFAULT_FILTER)?;

    tracing::info!("Initializing NHL sync API server");

    env_util::preflight_check(
        "api_server",
        &["API_SECRET"],
        &["API_HOST", "API_PORT", "DATABASE_URL", "DB_HOST", "NHL_API_BASE_URL", "SYNC_DAEMON"],
    )?;

    let server = ApiServer::from_env()?;
    let config = SyncConfig::from_env()?;

    let storage = open_storage(&config, false).await?;
    let source = Arc::new(NhlApiClient::new(&config)?);
    let runner = SyncRunner::assemble(&config, source, storage);

    server.run(runner).await?;

    Ok(())
}
