pub mod api;
pub mod cli;
pub mod config;
pub mod database_ops;
pub mod error;
pub mod normalization;
pub mod orchestrator;
pub mod realtime;
pub mod status;
pub mod telemetry;

pub mod util {
    pub mod env;
}

pub use config::SyncConfig;
pub use database_ops::backfill::Season;
pub use database_ops::sync_engine::{EntityKind, SyncEngine};
pub use orchestrator::{SyncRequest, SyncRunner};
