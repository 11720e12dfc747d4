use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use super::backfill::Season;
use super::nhl::seed::{franchise_by_id, seed_documents, SeedTeam};
use super::nhl::DataSource;
use super::records::{GoalieStat, Player, PlayerStat, Record, Team};
use super::storage::{Storage, UpsertBatch};
use crate::error::ValidationError;
use crate::normalization::extract::preview;
use crate::normalization::nhl::{
    box_score_entries, flatten_schedule, game_side_teams, map_box_score_entry, map_game,
    map_player, map_team, roster_player_id, Rejected, StatRecord, TeamDirectory,
};
use crate::realtime::{LogLevel, NoopObserver, SyncEvent, SyncObserver};

/// Longest document excerpt written to the log for a rejected item.
const REJECT_PREVIEW_LEN: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Teams,
    Players,
    Games,
    Stats,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Teams,
        EntityKind::Players,
        EntityKind::Games,
        EntityKind::Stats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Teams => "teams",
            EntityKind::Players => "players",
            EntityKind::Games => "games",
            EntityKind::Stats => "stats",
        }
    }

    /// Games and stats are synced per season; teams and players are not.
    pub fn is_seasonal(&self) -> bool {
        matches!(self, EntityKind::Games | EntityKind::Stats)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "teams" => Ok(EntityKind::Teams),
            "players" => Ok(EntityKind::Players),
            "games" => Ok(EntityKind::Games),
            "stats" => Ok(EntityKind::Stats),
            _ => Err(ValidationError::UnknownTarget(s.to_string())),
        }
    }
}

/// Outcome of one entity operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub fetched: usize,
    pub mapped: usize,
    pub rejected: usize,
    /// Items whose fetch failed and were skipped.
    pub skipped: usize,
    pub upserted: u64,
}

/// Fetch, map and upsert for each entity type. Per-item failures are logged
/// and skipped; only storage failures escape.
pub struct SyncEngine {
    source: Arc<dyn DataSource>,
    storage: Arc<dyn Storage>,
    observer: Arc<dyn SyncObserver>,
    directory: TeamDirectory,
    fallback_teams: bool,
}

impl SyncEngine {
    pub fn new(source: Arc<dyn DataSource>, storage: Arc<dyn Storage>) -> Self {
        Self {
            source,
            storage,
            observer: Arc::new(NoopObserver),
            directory: TeamDirectory::new(),
            fallback_teams: true,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_fallback_teams(mut self, enabled: bool) -> Self {
        self.fallback_teams = enabled;
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn directory(&self) -> &TeamDirectory {
        &self.directory
    }

    /// Run the operation for `kind`; `season` is ignored by teams and players.
    pub async fn run(&self, kind: EntityKind, season: &Season) -> Result<SyncReport> {
        match kind {
            EntityKind::Teams => self.sync_teams().await,
            EntityKind::Players => self.sync_players().await,
            EntityKind::Games => self.sync_games(season).await,
            EntityKind::Stats => self.sync_stats(season).await,
        }
    }

    fn notify(&self, level: LogLevel, message: impl Into<String>) {
        self.observer.on_event(&SyncEvent::Log {
            level,
            message: message.into(),
        });
    }

    fn task(&self, label: String) {
        info!(task = %label, "task started");
        self.observer.on_event(&SyncEvent::TaskStarted { task: label });
    }

    fn rejected(&self, rejected: &Rejected) {
        error!(
            entity = rejected.entity,
            reason = %rejected.reason,
            document = %preview(&rejected.document, REJECT_PREVIEW_LEN),
            "skipping document"
        );
        self.notify(LogLevel::Error, format!("skipped {rejected}"));
    }

    /// Upsert `records` as one batch. Empty input is logged, not written.
    async fn write<R: Record>(&self, entity: EntityKind, records: &[R]) -> Result<u64> {
        if records.is_empty() {
            info!(entity = %entity, table = R::TABLE, "nothing to sync");
            self.notify(LogLevel::Info, format!("no {} to sync", R::TABLE));
            return Ok(0);
        }
        let batch = UpsertBatch::from_records(records);
        let rows = self
            .storage
            .upsert(&batch)
            .await
            .with_context(|| format!("upserting {} rows into {}", batch.len(), R::TABLE))?;
        info!(entity = %entity, table = R::TABLE, rows, "upserted");
        self.observer.on_event(&SyncEvent::Upserted {
            entity,
            table: R::TABLE,
            rows,
        });
        Ok(rows)
    }

    /// Fill the team directory from storage after a restart.
    async fn warm_directory(&self) -> Result<()> {
        if !self.directory.is_empty() {
            return Ok(());
        }
        let codes = self.storage.team_codes().await.context("loading team codes")?;
        for (code, id) in &codes {
            self.directory.register(code, *id);
        }
        info!(teams = codes.len(), "team directory warmed from storage");
        Ok(())
    }

    /// Fetched (or seeded) teams mapped to records. Registers every team in
    /// the directory.
    async fn team_records(&self, report: &mut SyncReport) -> Vec<Team> {
        let mut docs = match self.source.fetch_teams().await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(error = %e, "team fetch failed; treating as no data");
                self.notify(LogLevel::Warn, format!("team fetch failed: {e}"));
                Vec::new()
            }
        };
        if docs.is_empty() && self.fallback_teams {
            warn!("no teams fetched; using static fallback table");
            self.notify(LogLevel::Warn, "using fallback team table");
            docs = seed_documents();
        }
        report.fetched += docs.len();

        let mut teams = Vec::with_capacity(docs.len());
        for doc in &docs {
            match map_team(doc) {
                Ok(team) => teams.push(team),
                Err(r) => {
                    report.rejected += 1;
                    self.rejected(&r);
                }
            }
        }
        self.directory.register_teams(&teams);
        report.mapped += teams.len();
        teams
    }

    #[instrument(skip(self))]
    pub async fn sync_teams(&self) -> Result<SyncReport> {
        self.task("Syncing teams".to_string());
        let mut report = SyncReport::default();
        let teams = self.team_records(&mut report).await;
        report.upserted = self.write(EntityKind::Teams, &teams).await?;
        Ok(report)
    }

    #[instrument(skip(self))]
    pub async fn sync_players(&self) -> Result<SyncReport> {
        self.task("Syncing players".to_string());
        let mut report = SyncReport::default();
        let mut teams_report = SyncReport::default();
        let teams = self.team_records(&mut teams_report).await;

        let mut players: Vec<Player> = Vec::new();
        for team in &teams {
            let roster = match self.source.fetch_roster(team.id).await {
                Ok(roster) => roster,
                Err(e) => {
                    warn!(team_id = team.id, error = %e, "roster fetch failed; skipping team");
                    self.notify(
                        LogLevel::Warn,
                        format!("roster fetch failed for team {}: {e}", team.id),
                    );
                    report.skipped += 1;
                    continue;
                }
            };
            report.fetched += roster.len();
            for entry in &roster {
                match self.player_from_entry(entry, team.id).await {
                    Ok(Some(player)) => players.push(player),
                    Ok(None) => report.skipped += 1,
                    Err(r) => {
                        report.rejected += 1;
                        self.rejected(&r);
                    }
                }
            }
        }
        report.mapped = players.len();
        report.upserted = self.write(EntityKind::Players, &players).await?;
        Ok(report)
    }

    /// `Ok(None)` when the detail fetch failed and the player is skipped.
    async fn player_from_entry(
        &self,
        entry: &Value,
        team_id: i64,
    ) -> Result<Option<Player>, Rejected> {
        if !entry.is_object() {
            return Err(rejected_entry("roster entry is not an object", entry));
        }
        let Some(player_id) = roster_player_id(entry) else {
            return Err(rejected_entry("roster entry has no player id", entry));
        };
        match self.source.fetch_player(player_id).await {
            Ok(detail) => map_player(&detail, entry, team_id).map(Some),
            Err(e) => {
                warn!(player_id, team_id, error = %e, "player fetch failed; skipping player");
                self.notify(
                    LogLevel::Warn,
                    format!("player fetch failed for {player_id}: {e}"),
                );
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, season), fields(season = %season))]
    pub async fn sync_games(&self, season: &Season) -> Result<SyncReport> {
        self.task(format!("Syncing games for {season}"));
        self.warm_directory().await?;
        let mut report = SyncReport::default();

        let groups = match self.source.fetch_schedule(Some(season), None).await {
            Ok(groups) => groups,
            Err(e) => {
                warn!(error = %e, "schedule fetch failed; treating as no data");
                self.notify(LogLevel::Warn, format!("schedule fetch failed for {season}: {e}"));
                Vec::new()
            }
        };
        let (docs, bad_items) = flatten_schedule(&groups);
        report.fetched = docs.len();
        report.rejected = bad_items.len();
        for r in &bad_items {
            self.rejected(r);
        }

        let mut games = Vec::with_capacity(docs.len());
        let mut sides = Vec::new();
        for doc in docs {
            match map_game(doc, season, &self.directory) {
                Ok(game) => {
                    games.push(game);
                    sides.extend(game_side_teams(doc, &self.directory));
                }
                Err(r) => {
                    report.rejected += 1;
                    self.rejected(&r);
                }
            }
        }
        report.mapped = games.len();

        let missing = self.missing_teams(&sides).await?;
        if !missing.is_empty() {
            info!(teams = missing.len(), "writing teams referenced only by games");
            self.directory.register_teams(&missing);
            self.write(EntityKind::Teams, &missing).await?;
        }
        report.upserted = self.write(EntityKind::Games, &games).await?;
        Ok(report)
    }

    /// Teams referenced by games but not stored yet. Relocated franchises come
    /// from the seed table, anything else from the game's own team fields.
    async fn missing_teams(&self, sides: &[Value]) -> Result<Vec<Team>> {
        if sides.is_empty() {
            return Ok(Vec::new());
        }
        let mut known: HashSet<i64> = self
            .storage
            .team_codes()
            .await
            .context("loading stored teams")?
            .into_iter()
            .map(|(_, id)| id)
            .collect();
        let mut teams = Vec::new();
        for side in sides {
            let Some(id) = side.get("id").and_then(Value::as_i64) else {
                continue;
            };
            if !known.insert(id) {
                continue;
            }
            let doc = franchise_by_id(id)
                .map(SeedTeam::document)
                .unwrap_or_else(|| side.clone());
            match map_team(&doc) {
                Ok(team) => teams.push(team),
                Err(r) => self.rejected(&r),
            }
        }
        Ok(teams)
    }

    #[instrument(skip(self, season), fields(season = %season))]
    pub async fn sync_stats(&self, season: &Season) -> Result<SyncReport> {
        self.task(format!("Syncing stats for {season}"));
        self.warm_directory().await?;
        let mut report = SyncReport::default();

        let game_ids = self
            .storage
            .completed_game_ids(season)
            .await
            .context("selecting completed games")?;
        info!(games = game_ids.len(), "completed games to process");

        let mut skaters: Vec<PlayerStat> = Vec::new();
        let mut goalies: Vec<GoalieStat> = Vec::new();
        for game_id in game_ids {
            let box_score = match self.source.fetch_box_score(game_id).await {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(game_id, error = %e, "box score fetch failed; skipping game");
                    self.notify(
                        LogLevel::Warn,
                        format!("box score fetch failed for game {game_id}: {e}"),
                    );
                    report.skipped += 1;
                    continue;
                }
            };
            let entries = box_score_entries(&box_score, &self.directory);
            report.fetched += entries.len();
            for entry in &entries {
                match map_box_score_entry(entry, game_id) {
                    Ok(StatRecord::Skater(s)) => skaters.push(s),
                    Ok(StatRecord::Goalie(g)) => goalies.push(g),
                    Err(r) => {
                        report.rejected += 1;
                        self.rejected(&r);
                    }
                }
            }
        }
        report.mapped = skaters.len() + goalies.len();
        report.upserted = self.write(EntityKind::Stats, &skaters).await?;
        report.upserted += self.write(EntityKind::Stats, &goalies).await?;
        Ok(report)
    }
}

fn rejected_entry(reason: &str, entry: &Value) -> Rejected {
    Rejected {
        entity: "player",
        reason: reason.to_string(),
        document: entry.clone(),
    }
}
