// API request/response models (DTOs)

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database_ops::backfill::Season;
use crate::orchestrator::SyncRunner;

/// Shared handler state.
pub struct AppState {
    pub runner: Arc<SyncRunner>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(runner: Arc<SyncRunner>) -> Self {
        Self {
            runner,
            started_at: Instant::now(),
        }
    }
}

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: Some(Meta::now()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            meta: Some(Meta::now()),
        }
    }
}

/// Metadata included in all API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct Meta {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub version: String,
}

impl Meta {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: uuid::Uuid::new_v4().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub uptime_seconds: u64,
    pub daemon_active: bool,
}

fn default_entity() -> String {
    "all".to_string()
}

/// Body of `POST /api/v1/sync/trigger`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SyncTriggerRequest {
    /// teams, players, games, stats or all
    #[serde(default = "default_entity")]
    pub entity: String,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub all_seasons: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncAccepted {
    pub entity: String,
    pub seasons: Vec<Season>,
    pub status: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DaemonStartRequest {
    /// Pin every tick to this season instead of the current one.
    #[serde(default)]
    pub season: Option<String>,
}
