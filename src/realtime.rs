//! Progress events emitted by the sync engine and the dashboard stream built
//! on top of them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::database_ops::sync_engine::EntityKind;
use crate::status::SyncStatus;

/// Capacity of the dashboard broadcast channel; slow subscribers lag, they
/// never block the engine.
pub const DASHBOARD_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    TaskStarted {
        task: String,
    },
    /// One storage upsert finished.
    Upserted {
        entity: EntityKind,
        table: &'static str,
        rows: u64,
    },
    Log {
        level: LogLevel,
        message: String,
    },
}

/// Receives engine events. Implementations must not block.
pub trait SyncObserver: Send + Sync {
    fn on_event(&self, event: &SyncEvent);
}

/// Drops every event.
pub struct NoopObserver;

impl SyncObserver for NoopObserver {
    fn on_event(&self, _event: &SyncEvent) {}
}

/// What dashboard subscribers receive.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DashboardEvent {
    Status(SyncStatus),
    Log {
        level: LogLevel,
        message: String,
        at: DateTime<Utc>,
    },
}

impl DashboardEvent {
    /// Render as one server-sent-events frame.
    pub fn to_sse_frame(&self) -> String {
        let event = match self {
            DashboardEvent::Status(_) => "status",
            DashboardEvent::Log { .. } => "log",
        };
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("event: {event}\ndata: {data}\n\n")
    }
}

pub fn dashboard_channel() -> broadcast::Sender<DashboardEvent> {
    let (tx, _rx) = broadcast::channel(DASHBOARD_CHANNEL_CAPACITY);
    tx
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every event for assertions.
    #[derive(Default)]
    pub struct RecordingObserver {
        pub events: Mutex<Vec<SyncEvent>>,
    }

    impl RecordingObserver {
        pub fn logs(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    SyncEvent::Log { message, .. } => Some(message.clone()),
                    _ => None,
                })
                .collect()
        }

        pub fn upserts(&self) -> Vec<(EntityKind, &'static str, u64)> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    SyncEvent::Upserted {
                        entity,
                        table,
                        rows,
                    } => Some((*entity, *table, *rows)),
                    _ => None,
                })
                .collect()
        }
    }

    impl SyncObserver for RecordingObserver {
        fn on_event(&self, event: &SyncEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tags() {
        let ev = SyncEvent::Upserted {
            entity: EntityKind::Games,
            table: "games",
            rows: 2,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "upserted");
        assert_eq!(json["entity"], "games");
        assert_eq!(json["rows"], 2);
    }

    #[test]
    fn sse_frames_name_the_event() {
        let frame = DashboardEvent::Log {
            level: LogLevel::Warn,
            message: "roster fetch failed".into(),
            at: Utc::now(),
        }
        .to_sse_frame();
        assert!(frame.starts_with("event: log\ndata: {"));
        assert!(frame.ends_with("\n\n"));
        assert!(frame.contains("\"level\":\"warn\""));
    }
}
