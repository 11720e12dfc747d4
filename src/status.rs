//! Run status shared between the runner, the HTTP control surface and the
//! dashboard stream.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::database_ops::sync_engine::EntityKind;
use crate::realtime::{dashboard_channel, DashboardEvent, SyncEvent, SyncObserver};

/// Progress added per storage upsert.
pub const PROGRESS_STEP: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    #[default]
    Idle,
    RunningOneShot,
    RunningDaemon,
    Cancelled,
}

/// Rows written per entity type during the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct UpdateCounters {
    pub teams_updated: u64,
    pub players_updated: u64,
    pub games_updated: u64,
    pub stats_updated: u64,
}

impl UpdateCounters {
    pub fn add(&mut self, kind: EntityKind, rows: u64) {
        let slot = match kind {
            EntityKind::Teams => &mut self.teams_updated,
            EntityKind::Players => &mut self.players_updated,
            EntityKind::Games => &mut self.games_updated,
            EntityKind::Stats => &mut self.stats_updated,
        };
        *slot = slot.saturating_add(rows);
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SyncStatus {
    pub state: RunnerState,
    pub is_running: bool,
    pub daemon_active: bool,
    pub current_task: Option<String>,
    pub progress: u8,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub stats: UpdateCounters,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FinalStatus {
    Completed,
    CompletedWithErrors,
    Cancelled,
}

impl FinalStatus {
    pub fn label(&self) -> &'static str {
        match self {
            FinalStatus::Completed => "Completed",
            FinalStatus::CompletedWithErrors => "Completed with errors",
            FinalStatus::Cancelled => "Cancelled",
        }
    }
}

/// Owns the live [`SyncStatus`]. Applies engine events and re-broadcasts every
/// change to dashboard subscribers.
pub struct StatusTracker {
    status: Mutex<SyncStatus>,
    events: broadcast::Sender<DashboardEvent>,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(SyncStatus::default()),
            events: dashboard_channel(),
        }
    }

    pub fn snapshot(&self) -> SyncStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    fn update(&self, f: impl FnOnce(&mut SyncStatus)) {
        let snapshot = {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut status);
            status.clone()
        };
        // no subscribers is fine
        let _ = self.events.send(DashboardEvent::Status(snapshot));
    }

    fn log(&self, level: crate::realtime::LogLevel, message: String) {
        let _ = self.events.send(DashboardEvent::Log {
            level,
            message,
            at: Utc::now(),
        });
    }

    /// A session starts: counters and progress reset.
    pub fn begin_session(&self, state: RunnerState) {
        self.update(|s| {
            s.state = state;
            s.is_running = true;
            s.current_task = Some("Starting".to_string());
            s.progress = 0;
            s.last_error = None;
            s.stats = UpdateCounters::default();
        });
    }

    pub fn finish_session(&self, outcome: FinalStatus, last_error: Option<String>) {
        self.update(|s| {
            s.is_running = false;
            s.current_task = Some(outcome.label().to_string());
            s.last_run = Some(Utc::now());
            s.last_error = last_error;
            s.state = match outcome {
                FinalStatus::Cancelled => RunnerState::Cancelled,
                _ if s.daemon_active => RunnerState::RunningDaemon,
                _ => RunnerState::Idle,
            };
            if outcome != FinalStatus::Cancelled {
                s.progress = 100;
            }
        });
    }

    pub fn set_daemon_active(&self, active: bool) {
        self.update(|s| {
            s.daemon_active = active;
            if active && !s.is_running {
                s.state = RunnerState::RunningDaemon;
            }
        });
    }

    /// Explicit cancel request; a running session finishes as cancelled.
    pub fn mark_cancelled(&self) {
        self.update(|s| {
            s.daemon_active = false;
            s.state = RunnerState::Cancelled;
            let label = if s.is_running {
                "Cancelling"
            } else {
                FinalStatus::Cancelled.label()
            };
            s.current_task = Some(label.to_string());
        });
    }
}

impl SyncObserver for StatusTracker {
    fn on_event(&self, event: &SyncEvent) {
        match event {
            SyncEvent::TaskStarted { task } => {
                let task = task.clone();
                self.update(|s| s.current_task = Some(task));
            }
            SyncEvent::Upserted { entity, rows, .. } => {
                debug!(entity = %entity, rows, "progress");
                self.update(|s| {
                    s.stats.add(*entity, *rows);
                    s.progress = s.progress.saturating_add(PROGRESS_STEP).min(100);
                });
            }
            SyncEvent::Log { level, message } => self.log(*level, message.clone()),
        }
    }
}
