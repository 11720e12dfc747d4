use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};

use super::seed::{conference_id, division_id, seed_by_code, seed_by_id, FALLBACK_TEAMS};
use super::DataSource;
use crate::config::{ScheduleMode, SyncConfig};
use crate::database_ops::backfill::Season;
use crate::normalization::extract::{
    int_field, lookup, preview, text_field, value_as_i64, Candidates,
};

const USER_AGENT: &str = concat!("nhl-sync/", env!("CARGO_PKG_VERSION"));

/// Upper bound on week pages fetched for one season walk.
const MAX_WEEK_PAGES: usize = 75;

const ROSTER_GROUPS: &[&str] = &["forwards", "defensemen", "goalies"];

const TEAM_ID: Candidates = &[&["id"], &["teamId"]];
const TEAM_CODE: Candidates = &[&["abbreviation"], &["abbrev"], &["teamAbbrev", "default"]];
const DIVISION_NAME: Candidates = &[&["divisionName"]];
const CONFERENCE_NAME: Candidates = &[&["conferenceName"]];
const GAME_ID: Candidates = &[&["id"], &["gamePk"]];
const GAME_DATE: Candidates = &[&["gameDate"], &["startTimeUTC"]];

/// Client for `api-web.nhle.com/v1`.
pub struct NhlApiClient {
    client: Client,
    base_url: String,
    schedule_mode: ScheduleMode,
    /// Team id to abbreviation; roster and club endpoints are addressed by code.
    codes: RwLock<HashMap<i64, String>>,
}

impl NhlApiClient {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.api_timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            schedule_mode: config.schedule_mode,
            codes: RwLock::new(HashMap::new()),
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_json(&self, endpoint: &str) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "GET {url} returned {status}: {}",
                preview(&Value::String(body), 200)
            );
        }
        resp.json::<Value>()
            .await
            .with_context(|| format!("decoding {url}"))
    }

    fn remember(&self, id: i64, code: &str) {
        let mut codes = self.codes.write().unwrap_or_else(|e| e.into_inner());
        codes.insert(id, code.to_ascii_uppercase());
    }

    fn team_code(&self, team_id: i64) -> Option<String> {
        let codes = self.codes.read().unwrap_or_else(|e| e.into_inner());
        codes
            .get(&team_id)
            .cloned()
            .or_else(|| seed_by_id(team_id).map(|t| t.abbreviation.to_string()))
    }

    fn known_codes(&self) -> Vec<String> {
        let codes = self.codes.read().unwrap_or_else(|e| e.into_inner());
        if codes.is_empty() {
            FALLBACK_TEAMS
                .iter()
                .filter(|t| t.active)
                .map(|t| t.abbreviation.to_string())
                .collect()
        } else {
            let mut v: Vec<String> = codes.values().cloned().collect();
            v.sort();
            v
        }
    }

    async fn club_games(&self, code: &str, season: &str) -> Result<Vec<Value>> {
        let doc = self
            .get_json(&format!("club-schedule-season/{code}/{season}"))
            .await?;
        Ok(doc
            .get("games")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Every club's season schedule, merged by game id.
    async fn league_schedule_by_club(&self, season: &Season) -> Result<Vec<Value>> {
        let mut all = Vec::new();
        let mut failures = 0usize;
        let codes = self.known_codes();
        for code in &codes {
            match self.club_games(code, &season.to_string()).await {
                Ok(games) => all.extend(games),
                Err(e) => {
                    failures += 1;
                    warn!(team = %code, error = %e, "club schedule fetch failed");
                }
            }
        }
        if failures == codes.len() && !codes.is_empty() {
            bail!("every club schedule fetch failed for {season}");
        }
        Ok(group_by_date(dedupe_games(all)))
    }

    /// Walk week pages from September 1 of the start year to October 31 of the
    /// end year. Late playoffs (2020 bubble, 2021 final) fall after June.
    async fn league_schedule_by_week(&self, season: &Season) -> Result<Vec<Value>> {
        let (mut date, end) = season_window(season)?;
        let mut groups = Vec::new();
        let mut seen_dates: HashSet<String> = HashSet::new();
        let mut last_err = None;
        let mut pages_ok = 0usize;

        for _ in 0..MAX_WEEK_PAGES {
            if date > end {
                break;
            }
            match self.get_json(&format!("schedule/{date}")).await {
                Ok(page) => {
                    pages_ok += 1;
                    for group in week_groups(&page) {
                        let group = filter_season(&group, season);
                        let key = group
                            .get("date")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        if seen_dates.insert(key) {
                            groups.push(group);
                        }
                    }
                    date = next_start(&page, date);
                }
                Err(e) => {
                    warn!(week = %date, error = %e, "schedule week fetch failed");
                    last_err = Some(e);
                    date += Duration::days(7);
                }
            }
        }
        if pages_ok == 0 {
            if let Some(e) = last_err {
                return Err(e.context(format!("no schedule pages fetched for {season}")));
            }
        }
        debug!(season = %season, groups = groups.len(), pages_ok, "weekly schedule walk done");
        Ok(groups)
    }
}

#[async_trait]
impl DataSource for NhlApiClient {
    #[instrument(skip(self))]
    async fn fetch_teams(&self) -> Result<Vec<Value>> {
        let doc = self.get_json("standings/now").await?;
        let teams = standings_to_team_docs(&doc);
        for team in &teams {
            let id = int_field(&[team], TEAM_ID);
            let code = text_field(&[team], TEAM_CODE);
            if let (Some(id), Some(code)) = (id, code) {
                self.remember(id, &code);
            }
        }
        info!(teams = teams.len(), "fetched teams");
        Ok(teams)
    }

    #[instrument(skip(self))]
    async fn fetch_roster(&self, team_id: i64) -> Result<Vec<Value>> {
        let code = match self.team_code(team_id) {
            Some(code) => code,
            None => {
                self.fetch_teams().await?;
                self.team_code(team_id)
                    .with_context(|| format!("no team code known for team {team_id}"))?
            }
        };
        let doc = self.get_json(&format!("roster/{code}/current")).await?;
        Ok(roster_entries(&doc))
    }

    #[instrument(skip(self))]
    async fn fetch_player(&self, player_id: i64) -> Result<Value> {
        self.get_json(&format!("player/{player_id}/landing")).await
    }

    #[instrument(skip(self, season), fields(season = ?season.map(|s| s.to_string())))]
    async fn fetch_schedule(
        &self,
        season: Option<&Season>,
        team_id: Option<i64>,
    ) -> Result<Vec<Value>> {
        if let Some(team_id) = team_id {
            let code = self
                .team_code(team_id)
                .with_context(|| format!("no team code known for team {team_id}"))?;
            let season = season.map(Season::to_string).unwrap_or_else(|| "now".into());
            let games = self.club_games(&code, &season).await?;
            return Ok(group_by_date(games));
        }
        match season {
            Some(season) => match self.schedule_mode {
                ScheduleMode::Weekly => self.league_schedule_by_week(season).await,
                ScheduleMode::Club => self.league_schedule_by_club(season).await,
            },
            None => {
                let page = self.get_json("schedule/now").await?;
                Ok(week_groups(&page))
            }
        }
    }

    #[instrument(skip(self))]
    async fn fetch_box_score(&self, game_id: i64) -> Result<Value> {
        self.get_json(&format!("gamecenter/{game_id}/boxscore")).await
    }
}

/// Team documents from a standings response. Handles the flat current shape
/// (one row per team, no numeric id) and the legacy division-grouped shape.
/// Missing ids and division/conference ids are filled from the seed table.
pub fn standings_to_team_docs(doc: &Value) -> Vec<Value> {
    if let Some(teams) = doc.get("teams").and_then(Value::as_array) {
        return teams.clone();
    }
    let groups = doc
        .get("standings")
        .or_else(|| doc.get("records"))
        .and_then(Value::as_array);
    let Some(groups) = groups else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for group in groups {
        match group.get("teamRecords").and_then(Value::as_array) {
            Some(records) => {
                for record in records {
                    let Some(team) = record.get("team").and_then(Value::as_object) else {
                        continue;
                    };
                    let mut row = team.clone();
                    if let Some(division) = group.get("division") {
                        row.insert("division".into(), division.clone());
                    }
                    if let Some(conference) = group.get("conference") {
                        row.insert("conference".into(), conference.clone());
                    }
                    out.push(enrich_team_row(row));
                }
            }
            None => {
                if let Some(row) = group.as_object() {
                    out.push(enrich_team_row(row.clone()));
                }
            }
        }
    }
    out
}

fn enrich_team_row(mut row: Map<String, Value>) -> Value {
    let doc = Value::Object(row.clone());
    let code = text_field(&[&doc], TEAM_CODE);
    let id = int_field(&[&doc], TEAM_ID)
        .or_else(|| code.as_deref().and_then(seed_by_code).map(|t| t.id));
    if let Some(id) = id {
        row.insert("id".into(), json!(id));
        if code.is_none() {
            if let Some(seed) = seed_by_id(id) {
                row.insert("abbreviation".into(), json!(seed.abbreviation));
            }
        }
    }
    if let Some(code) = code {
        row.entry("abbreviation").or_insert(json!(code));
    }
    if !row.contains_key("divisionId") && !row.contains_key("division") {
        if let Some(id) = text_field(&[&doc], DIVISION_NAME).and_then(|n| division_id(&n)) {
            row.insert("divisionId".into(), json!(id));
        }
    }
    if !row.contains_key("conferenceId") && !row.contains_key("conference") {
        if let Some(id) =
            text_field(&[&doc], CONFERENCE_NAME).and_then(|n| conference_id(&n))
        {
            row.insert("conferenceId".into(), json!(id));
        }
    }
    Value::Object(row)
}

/// Roster entries from either the legacy `roster` list or position groups.
pub fn roster_entries(doc: &Value) -> Vec<Value> {
    if let Some(roster) = doc.get("roster").and_then(Value::as_array) {
        return roster.clone();
    }
    ROSTER_GROUPS
        .iter()
        .filter_map(|g| doc.get(*g).and_then(Value::as_array))
        .flatten()
        .cloned()
        .collect()
}

/// Date groups from a schedule page (`gameWeek` now, `dates` in the legacy API).
pub fn week_groups(page: &Value) -> Vec<Value> {
    page.get("gameWeek")
        .or_else(|| page.get("dates"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn season_number(season: &Season) -> i64 {
    season.start_year() as i64 * 10_000 + season.end_year() as i64
}

/// Drop games that belong to another season; games without a season stay.
pub fn filter_season(group: &Value, season: &Season) -> Value {
    let want = season_number(season);
    let mut group = group.clone();
    if let Some(games) = group.get_mut("games").and_then(Value::as_array_mut) {
        games.retain(|g| {
            lookup(g, &["season"])
                .and_then(value_as_i64)
                .map_or(true, |s| s == want)
        });
    }
    group
}

/// Next page start: `nextStartDate` when it moves forward, otherwise a week on.
pub fn next_start(page: &Value, current: NaiveDate) -> NaiveDate {
    page.get("nextStartDate")
        .and_then(Value::as_str)
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .filter(|d| *d > current)
        .unwrap_or(current + Duration::days(7))
}

fn season_window(season: &Season) -> Result<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(season.start_year(), 9, 1)
        .with_context(|| format!("no window start for {season}"))?;
    let end = NaiveDate::from_ymd_opt(season.end_year(), 10, 31)
        .with_context(|| format!("no window end for {season}"))?;
    Ok((start, end))
}

/// Keep the first occurrence of each game id; games without an id are kept.
pub fn dedupe_games(games: Vec<Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    games
        .into_iter()
        .filter(|g| match int_field(&[g], GAME_ID) {
            Some(id) => seen.insert(id),
            None => true,
        })
        .collect()
}

/// Group flat game lists into `{date, games}` by their calendar date.
pub fn group_by_date(games: Vec<Value>) -> Vec<Value> {
    let mut by_date: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for game in games {
        let date = text_field(&[&game], GAME_DATE)
            .map(|d| d.chars().take(10).collect::<String>())
            .unwrap_or_default();
        by_date.entry(date).or_default().push(game);
    }
    by_date
        .into_iter()
        .map(|(date, games)| json!({ "date": date, "games": games }))
        .collect()
}
