pub mod db_counts;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::SyncConfig;
use crate::database_ops::db::Db;
use crate::database_ops::storage::{MemoryStore, Storage};
use crate::util::env as env_util;

/// Postgres storage, or the in-memory store for dry runs.
pub async fn open_storage(config: &SyncConfig, dry_run: bool) -> Result<Arc<dyn Storage>> {
    if dry_run {
        info!("dry run: writing to in-memory storage");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let database_url = env_util::db_url()?;
    let db = Db::connect(&database_url, config.db_max_conns)
        .await
        .context("connecting to Postgres")?;
    info!("Database connected successfully");
    Ok(Arc::new(db))
}
