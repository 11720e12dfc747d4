use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::backfill::Season;
use super::sync_engine::EntityKind;
use crate::config::RefreshIntervals;
use crate::orchestrator::SyncRunner;
use crate::status::FinalStatus;

/// One repeating timer per entity type. Every timer runs in its own task and
/// stops when the shared token is cancelled.
pub struct DaemonManager {
    token: CancellationToken,
    tasks: Vec<(EntityKind, JoinHandle<()>)>,
}

impl DaemonManager {
    pub fn spawn(
        runner: Arc<SyncRunner>,
        intervals: RefreshIntervals,
        pinned: Option<Season>,
        token: CancellationToken,
    ) -> Self {
        let tasks = EntityKind::ALL
            .iter()
            .map(|kind| {
                let period = intervals.for_kind(*kind);
                let task = tokio::spawn(timer_loop(
                    Arc::clone(&runner),
                    *kind,
                    period,
                    pinned,
                    token.clone(),
                ));
                (*kind, task)
            })
            .collect();
        Self { token, tasks }
    }

    pub fn is_finished(&self) -> bool {
        self.token.is_cancelled() || self.tasks.iter().all(|(_, t)| t.is_finished())
    }

    /// Stop every timer and wait for the tasks, logging any that panicked.
    pub async fn join(self) {
        self.token.cancel();
        let (kinds, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        for (kind, res) in kinds.into_iter().zip(join_all(handles).await) {
            match res {
                Ok(()) => info!(entity = %kind, "daemon timer stopped"),
                Err(e) => error!(entity = %kind, error = %e, "daemon timer task failed"),
            }
        }
    }
}

async fn timer_loop(
    runner: Arc<SyncRunner>,
    kind: EntityKind,
    period: Duration,
    pinned: Option<Season>,
    token: CancellationToken,
) {
    // first firing one full period after start
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(entity = %kind, period_secs = period.as_secs(), "daemon timer registered");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match runner.run_daemon_tick(kind, pinned, &token).await {
            None => break,
            Some(summary) => match summary.status {
                FinalStatus::Completed => info!(entity = %kind, "daemon tick completed"),
                FinalStatus::CompletedWithErrors => {
                    for op in summary.failures() {
                        warn!(entity = %kind, error = ?op.error, "daemon tick had failures");
                    }
                }
                FinalStatus::Cancelled => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::database_ops::storage::MemoryStore;
    use crate::database_ops::sync_engine::testing::FakeSource;
    use serde_json::json;

    fn runner(store: Arc<MemoryStore>) -> Arc<SyncRunner> {
        let source = FakeSource {
            teams: Some(vec![json!({ "id": 6, "name": "Boston Bruins", "abbreviation": "BOS" })]),
            schedule: Some(vec![]),
            ..Default::default()
        };
        let config = SyncConfig {
            fallback_teams: false,
            ..SyncConfig::default()
        };
        SyncRunner::assemble(&config, Arc::new(source), store)
    }

    fn fast(teams_ms: u64) -> RefreshIntervals {
        RefreshIntervals {
            teams: Duration::from_millis(teams_ms),
            players: Duration::from_secs(3_600),
            games: Duration::from_secs(3_600),
            stats: Duration::from_secs(3_600),
        }
    }

    #[tokio::test]
    async fn timers_fire_after_one_period_and_stop_on_cancel() {
        let store = Arc::new(MemoryStore::new());
        let token = CancellationToken::new();
        let manager = DaemonManager::spawn(runner(store.clone()), fast(50), None, token.clone());

        assert_eq!(store.row_count("teams"), 0);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.row_count("teams"), 1);
        assert!(!manager.is_finished());

        token.cancel();
        assert!(manager.is_finished());
        manager.join().await;
    }

    #[tokio::test]
    async fn ticks_wait_for_a_running_session() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner(store.clone());
        let token = CancellationToken::new();

        let held = runner.request_one_shot(
            crate::orchestrator::SyncRequest::parse("players", Some("20222023"), false).unwrap(),
        );
        assert!(held.is_ok());
        let manager = DaemonManager::spawn(Arc::clone(&runner), fast(20), None, token.clone());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(store.row_count("teams"), 1);
        manager.join().await;
    }
}
