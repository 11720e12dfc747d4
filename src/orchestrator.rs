//! Session control: one-shot runs, multi-season backfill, daemon scheduling
//! and cancellation on top of the [`SyncEngine`].

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{RefreshIntervals, SyncConfig};
use crate::database_ops::backfill::{backfill_seasons, for_each_season, Season};
use crate::database_ops::nhl::DataSource;
use crate::database_ops::storage::Storage;
use crate::database_ops::sync_engine::{EntityKind, SyncEngine, SyncReport};
use crate::database_ops::worker_manager::DaemonManager;
use crate::error::{RunnerError, ValidationError};
use crate::realtime::DashboardEvent;
use crate::status::{FinalStatus, RunnerState, StatusTracker, SyncStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncTarget {
    All,
    One(EntityKind),
}

impl SyncTarget {
    /// Entity types in session order.
    pub fn kinds(&self) -> Vec<EntityKind> {
        match self {
            SyncTarget::All => EntityKind::ALL.to_vec(),
            SyncTarget::One(kind) => vec![*kind],
        }
    }
}

impl FromStr for SyncTarget {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(SyncTarget::All);
        }
        s.parse().map(SyncTarget::One)
    }
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTarget::All => f.write_str("all"),
            SyncTarget::One(kind) => write!(f, "{kind}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    pub target: SyncTarget,
    pub season: Option<Season>,
    pub all_seasons: bool,
}

impl SyncRequest {
    /// Validate raw control-surface input before anything is fetched.
    pub fn parse(
        target: &str,
        season: Option<&str>,
        all_seasons: bool,
    ) -> Result<Self, ValidationError> {
        let target = target.parse()?;
        let season = season
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Season::parse)
            .transpose()?;
        Ok(Self {
            target,
            season,
            all_seasons,
        })
    }

    /// Seasons this request covers, ascending.
    pub fn seasons(&self, backfill_start_year: i32) -> Vec<Season> {
        if self.all_seasons {
            return backfill_seasons(backfill_start_year);
        }
        vec![self.season.unwrap_or_else(Season::current)]
    }
}

/// Result of one entity operation inside a session.
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    pub entity: EntityKind,
    pub season: Option<Season>,
    pub report: Option<SyncReport>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub status: FinalStatus,
    pub operations: Vec<OperationOutcome>,
}

impl RunSummary {
    pub fn failures(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.operations.iter().filter(|op| op.error.is_some())
    }

    pub fn succeeded(&self) -> bool {
        self.status == FinalStatus::Completed
    }
}

/// Owns the engine and serializes sessions. Manual requests are rejected
/// while a session runs; daemon ticks queue behind it.
pub struct SyncRunner {
    engine: SyncEngine,
    tracker: Arc<StatusTracker>,
    session: Arc<AsyncMutex<()>>,
    cancel: Mutex<CancellationToken>,
    daemon: Mutex<Option<DaemonManager>>,
    refresh: RefreshIntervals,
    backfill_start_year: i32,
}

impl SyncRunner {
    pub fn new(
        engine: SyncEngine,
        tracker: Arc<StatusTracker>,
        refresh: RefreshIntervals,
        backfill_start_year: i32,
    ) -> Self {
        Self {
            engine,
            tracker,
            session: Arc::new(AsyncMutex::new(())),
            cancel: Mutex::new(CancellationToken::new()),
            daemon: Mutex::new(None),
            refresh,
            backfill_start_year,
        }
    }

    /// Wire an engine whose progress feeds this runner's status tracker.
    pub fn assemble(
        config: &SyncConfig,
        source: Arc<dyn DataSource>,
        storage: Arc<dyn Storage>,
    ) -> Arc<Self> {
        let tracker = Arc::new(StatusTracker::new());
        let engine = SyncEngine::new(source, storage)
            .with_observer(tracker.clone())
            .with_fallback_teams(config.fallback_teams);
        Arc::new(Self::new(
            engine,
            tracker,
            config.refresh,
            config.backfill_start_year,
        ))
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        self.engine.storage()
    }

    pub fn status(&self) -> SyncStatus {
        self.tracker.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.tracker.subscribe()
    }

    pub fn refresh(&self) -> &RefreshIntervals {
        &self.refresh
    }

    pub fn backfill_start_year(&self) -> i32 {
        self.backfill_start_year
    }

    fn token(&self) -> CancellationToken {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run a session now, in the caller's task.
    pub async fn run_one_shot(&self, request: SyncRequest) -> Result<RunSummary, RunnerError> {
        let _guard = self.session.try_lock().map_err(|_| RunnerError::Busy)?;
        Ok(self
            .run_session(&request, &self.token(), RunnerState::RunningOneShot)
            .await)
    }

    /// Start a session in the background. Fails fast when one is running.
    pub fn request_one_shot(
        self: &Arc<Self>,
        request: SyncRequest,
    ) -> Result<JoinHandle<RunSummary>, RunnerError> {
        let guard = self
            .session
            .clone()
            .try_lock_owned()
            .map_err(|_| RunnerError::Busy)?;
        let runner = Arc::clone(self);
        let token = self.token();
        Ok(tokio::spawn(async move {
            let summary = runner
                .run_session(&request, &token, RunnerState::RunningOneShot)
                .await;
            drop(guard);
            summary
        }))
    }

    /// One daemon timer firing: waits for any running session, then syncs
    /// `kind`. `None` when cancelled while waiting.
    pub async fn run_daemon_tick(
        &self,
        kind: EntityKind,
        pinned: Option<Season>,
        token: &CancellationToken,
    ) -> Option<RunSummary> {
        let _guard = tokio::select! {
            _ = token.cancelled() => return None,
            guard = self.session.lock() => guard,
        };
        let request = SyncRequest {
            target: SyncTarget::One(kind),
            season: Some(pinned.unwrap_or_else(Season::current)),
            all_seasons: false,
        };
        Some(
            self.run_session(&request, token, RunnerState::RunningDaemon)
                .await,
        )
    }

    /// Register the four repeating timers.
    pub fn start_daemon(self: &Arc<Self>, pinned: Option<Season>) -> Result<(), RunnerError> {
        let mut daemon = self.daemon.lock().unwrap_or_else(|e| e.into_inner());
        if daemon.as_ref().is_some_and(|d| !d.is_finished()) {
            return Err(RunnerError::DaemonActive);
        }
        let manager = DaemonManager::spawn(Arc::clone(self), self.refresh, pinned, self.token());
        *daemon = Some(manager);
        self.tracker.set_daemon_active(true);
        info!(pinned = ?pinned.map(|s| s.to_string()), "daemon started");
        Ok(())
    }

    pub fn daemon_active(&self) -> bool {
        self.daemon
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|d| !d.is_finished())
    }

    /// Cancel the running session and stop the daemon. Later requests get a
    /// fresh token.
    pub fn cancel(&self) {
        {
            let mut token = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
            token.cancel();
            *token = CancellationToken::new();
        }
        let daemon = self.daemon.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(daemon) = daemon {
            tokio::spawn(daemon.join());
        }
        self.tracker.mark_cancelled();
        warn!("sync cancelled");
    }

    async fn run_operation(&self, kind: EntityKind, season: Option<Season>) -> OperationOutcome {
        let for_season = season.unwrap_or_else(Season::current);
        match self.engine.run(kind, &for_season).await {
            Ok(report) => OperationOutcome {
                entity: kind,
                season,
                report: Some(report),
                error: None,
            },
            Err(e) => {
                let message = format!("{e:#}");
                error!(entity = %kind, season = ?season.map(|s| s.to_string()), error = %message, "operation failed");
                OperationOutcome {
                    entity: kind,
                    season,
                    report: None,
                    error: Some(format!("{kind}: {message}")),
                }
            }
        }
    }

    /// Teams, then players, then games and stats per season. The caller holds
    /// the session lock.
    async fn run_session(
        &self,
        request: &SyncRequest,
        token: &CancellationToken,
        state: RunnerState,
    ) -> RunSummary {
        self.tracker.begin_session(state);
        info!(target = %request.target, all_seasons = request.all_seasons, "session started");

        let kinds = request.target.kinds();
        let results: Mutex<Vec<OperationOutcome>> = Mutex::new(Vec::new());
        let mut cancelled = false;

        for kind in kinds.iter().filter(|k| !k.is_seasonal()) {
            if token.is_cancelled() {
                cancelled = true;
                break;
            }
            let outcome = self.run_operation(*kind, None).await;
            results.lock().unwrap_or_else(|e| e.into_inner()).push(outcome);
        }

        let seasonal: Vec<EntityKind> = kinds.iter().copied().filter(EntityKind::is_seasonal).collect();
        if !cancelled && !seasonal.is_empty() {
            let seasons = request.seasons(self.backfill_start_year);
            let results = &results;
            let seasonal = &seasonal;
            let backfill = for_each_season(&seasons, token, move |season| async move {
                for kind in seasonal {
                    if token.is_cancelled() {
                        break;
                    }
                    let outcome = self.run_operation(*kind, Some(season)).await;
                    results.lock().unwrap_or_else(|e| e.into_inner()).push(outcome);
                }
            })
            .await;
            cancelled = backfill.cancelled;
        }
        // a cancel that lands during the last operation still ends the session
        cancelled = cancelled || token.is_cancelled();

        let operations = results.into_inner().unwrap_or_else(|e| e.into_inner());
        let last_error = operations.iter().rev().find_map(|op| op.error.clone());
        let status = if cancelled {
            FinalStatus::Cancelled
        } else if last_error.is_some() {
            FinalStatus::CompletedWithErrors
        } else {
            FinalStatus::Completed
        };
        self.tracker.finish_session(status, last_error);
        info!(status = status.label(), operations = operations.len(), "session finished");
        RunSummary { status, operations }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::storage::MemoryStore;
    use crate::database_ops::sync_engine::testing::{FailingStore, FakeSource};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    fn source() -> FakeSource {
        FakeSource {
            teams: Some(vec![
                json!({ "id": 6, "name": "Boston Bruins", "abbreviation": "BOS" }),
                json!({ "id": 10, "name": "Toronto Maple Leafs", "abbreviation": "TOR" }),
            ]),
            rosters: [(6, vec![]), (10, vec![])].into_iter().collect(),
            schedule: Some(vec![json!({ "games": [
                { "id": 1, "gameState": "FUT", "awayTeam": { "abbrev": "BOS" }, "homeTeam": { "abbrev": "TOR" } }
            ]})]),
            ..Default::default()
        }
    }

    fn runner_with(source: Arc<dyn DataSource>, storage: Arc<dyn Storage>) -> Arc<SyncRunner> {
        let config = SyncConfig {
            fallback_teams: false,
            ..SyncConfig::default()
        };
        SyncRunner::assemble(&config, source, storage)
    }

    fn one(kind: EntityKind, season: &str) -> SyncRequest {
        SyncRequest::parse(kind.as_str(), Some(season), false).unwrap()
    }

    #[test]
    fn requests_are_validated_before_running() {
        assert_eq!(
            SyncRequest::parse("goalies", None, false).unwrap_err(),
            ValidationError::UnknownTarget("goalies".into())
        );
        assert_eq!(
            SyncRequest::parse("games", Some("2022"), false).unwrap_err(),
            ValidationError::InvalidSeason("2022".into())
        );
        let all = SyncRequest::parse("ALL", Some(""), true).unwrap();
        assert_eq!(all.target, SyncTarget::All);
        assert_eq!(all.season, None);
    }

    #[test]
    fn season_list_resolution() {
        let explicit = SyncRequest::parse("games", Some("20192020"), false).unwrap();
        assert_eq!(explicit.seasons(2010), vec![Season::starting(2019)]);

        let current = SyncRequest::parse("games", None, false).unwrap();
        assert_eq!(current.seasons(2010), vec![Season::current()]);

        let backfill = SyncRequest::parse("games", Some("20192020"), true).unwrap();
        let seasons = backfill.seasons(2010);
        assert_eq!(seasons.first(), Some(&Season::starting(2010)));
        assert_eq!(seasons.last(), Some(&Season::current()));
    }

    #[tokio::test]
    async fn second_manual_request_is_rejected_while_busy() {
        let runner = runner_with(Arc::new(source()), Arc::new(MemoryStore::new()));
        let _held = runner.session.try_lock().unwrap();
        let err = runner
            .run_one_shot(one(EntityKind::Teams, "20222023"))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Busy));
        assert!(matches!(
            runner.request_one_shot(one(EntityKind::Teams, "20222023")),
            Err(RunnerError::Busy)
        ));
    }

    #[tokio::test]
    async fn full_session_updates_counters_and_status() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner_with(Arc::new(source()), store.clone());
        let request = SyncRequest::parse("all", Some("20222023"), false).unwrap();

        let summary = runner.request_one_shot(request).unwrap().await.unwrap();
        assert_eq!(summary.status, FinalStatus::Completed);
        let order: Vec<EntityKind> = summary.operations.iter().map(|op| op.entity).collect();
        assert_eq!(order, EntityKind::ALL.to_vec());

        let status = runner.status();
        assert!(!status.is_running);
        assert_eq!(status.state, RunnerState::Idle);
        assert_eq!(status.progress, 100);
        assert_eq!(status.stats.teams_updated, 2);
        assert_eq!(status.stats.games_updated, 1);
        assert_eq!(status.current_task.as_deref(), Some("Completed"));
        assert_eq!(store.row_count("games"), 1);
    }

    #[tokio::test]
    async fn failing_operations_do_not_stop_the_session() {
        let mut source = source();
        source.rosters.insert(6, vec![json!({ "person": { "id": 1 } })]);
        source.players.insert(1, json!({ "id": 1, "fullName": "Brad Marchand" }));
        // every operation reaches storage: teams, players and games upsert,
        // stats selects completed games
        let runner = runner_with(Arc::new(source), Arc::new(FailingStore));
        let summary = runner
            .run_one_shot(SyncRequest::parse("all", Some("20222023"), false).unwrap())
            .await
            .unwrap();
        assert_eq!(summary.status, FinalStatus::CompletedWithErrors);
        assert_eq!(summary.operations.len(), 4);
        assert_eq!(summary.failures().count(), 4);
        let status = runner.status();
        assert!(status.last_error.as_deref().unwrap_or("").starts_with("stats:"));
        assert_eq!(status.current_task.as_deref(), Some("Completed with errors"));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_the_first_operation() {
        let runner = runner_with(Arc::new(source()), Arc::new(MemoryStore::new()));
        let token = CancellationToken::new();
        token.cancel();
        let request = SyncRequest::parse("all", None, true).unwrap();
        let summary = runner
            .run_session(&request, &token, RunnerState::RunningOneShot)
            .await;
        assert_eq!(summary.status, FinalStatus::Cancelled);
        assert!(summary.operations.is_empty());
        assert_eq!(runner.status().state, RunnerState::Cancelled);
    }

    /// Cancels the session token while fetching teams or the schedule.
    struct CancelOnFetch {
        inner: FakeSource,
        token: CancellationToken,
        during: EntityKind,
    }

    #[async_trait]
    impl DataSource for CancelOnFetch {
        async fn fetch_teams(&self) -> Result<Vec<Value>> {
            if self.during == EntityKind::Teams {
                self.token.cancel();
            }
            self.inner.fetch_teams().await
        }
        async fn fetch_roster(&self, team_id: i64) -> Result<Vec<Value>> {
            self.inner.fetch_roster(team_id).await
        }
        async fn fetch_player(&self, player_id: i64) -> Result<Value> {
            self.inner.fetch_player(player_id).await
        }
        async fn fetch_schedule(
            &self,
            season: Option<&Season>,
            team_id: Option<i64>,
        ) -> Result<Vec<Value>> {
            if self.during == EntityKind::Games {
                self.token.cancel();
            }
            self.inner.fetch_schedule(season, team_id).await
        }
        async fn fetch_box_score(&self, game_id: i64) -> Result<Value> {
            self.inner.fetch_box_score(game_id).await
        }
    }

    #[tokio::test]
    async fn backfill_stops_after_the_season_in_flight() {
        let token = CancellationToken::new();
        let source = CancelOnFetch {
            inner: source(),
            token: token.clone(),
            during: EntityKind::Games,
        };
        let runner = runner_with(Arc::new(source), Arc::new(MemoryStore::new()));
        let request = SyncRequest::parse("all", None, true).unwrap();

        let summary = runner
            .run_session(&request, &token, RunnerState::RunningOneShot)
            .await;
        assert_eq!(summary.status, FinalStatus::Cancelled);
        let ops: Vec<(EntityKind, Option<Season>)> = summary
            .operations
            .iter()
            .map(|op| (op.entity, op.season))
            .collect();
        assert_eq!(
            ops,
            vec![
                (EntityKind::Teams, None),
                (EntityKind::Players, None),
                (EntityKind::Games, Some(Season::starting(2010))),
            ]
        );
    }

    #[tokio::test]
    async fn cancel_during_the_only_operation_ends_cancelled() {
        let token = CancellationToken::new();
        let source = CancelOnFetch {
            inner: source(),
            token: token.clone(),
            during: EntityKind::Teams,
        };
        let runner = runner_with(Arc::new(source), Arc::new(MemoryStore::new()));

        let summary = runner
            .run_session(&one(EntityKind::Teams, "20222023"), &token, RunnerState::RunningOneShot)
            .await;
        assert_eq!(summary.status, FinalStatus::Cancelled);
        assert_eq!(summary.operations.len(), 1);
        let status = runner.status();
        assert_eq!(status.state, RunnerState::Cancelled);
        assert_eq!(status.current_task.as_deref(), Some("Cancelled"));
    }

    #[tokio::test]
    async fn cancel_while_idle_leaves_a_terminal_label() {
        let runner = runner_with(Arc::new(source()), Arc::new(MemoryStore::new()));
        runner.cancel();
        let status = runner.status();
        assert_eq!(status.state, RunnerState::Cancelled);
        assert_eq!(status.current_task.as_deref(), Some("Cancelled"));
    }

    #[tokio::test]
    async fn cancel_resets_the_token_for_later_sessions() {
        let runner = runner_with(Arc::new(source()), Arc::new(MemoryStore::new()));
        runner.cancel();
        assert_eq!(runner.status().state, RunnerState::Cancelled);

        let summary = runner
            .run_one_shot(one(EntityKind::Teams, "20222023"))
            .await
            .unwrap();
        assert_eq!(summary.status, FinalStatus::Completed);
    }

    #[tokio::test]
    async fn daemon_cannot_be_started_twice() {
        let runner = runner_with(Arc::new(source()), Arc::new(MemoryStore::new()));
        runner.start_daemon(None).unwrap();
        assert!(runner.daemon_active());
        assert!(matches!(runner.start_daemon(None), Err(RunnerError::DaemonActive)));
        assert_eq!(runner.status().state, RunnerState::RunningDaemon);

        runner.cancel();
        assert!(!runner.daemon_active());
        runner.start_daemon(None).unwrap();
        runner.cancel();
    }
}
