//! Maps NHL API documents (current `api-web` and legacy `statsapi` shapes) onto
//! the fixed relational records.
//!
//! Every mapper returns either one record or a [`Rejected`] carrying the offending
//! document; nothing here returns an error.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use serde_json::{json, Value};

use super::extract::{
    bool_or, date_field, datetime_field, first_present, int_field, int_or, lookup, text_field,
    text_or, value_as_i64, value_as_string, Candidates,
};
use crate::database_ops::backfill::Season;
use crate::database_ops::records::{Game, GoalieStat, Player, PlayerStat, Team};

/// A document the mapper refused, kept for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub entity: &'static str,
    pub reason: String,
    pub document: Value,
}

impl Rejected {
    fn new(entity: &'static str, reason: impl Into<String>, document: &Value) -> Self {
        Self {
            entity,
            reason: reason.into(),
            document: document.clone(),
        }
    }
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rejected: {}", self.entity, self.reason)
    }
}

/// Team abbreviation to id, filled by team syncs and used to resolve games and
/// box scores that only carry the abbreviation.
#[derive(Debug, Default)]
pub struct TeamDirectory {
    by_code: RwLock<HashMap<String, i64>>,
}

impl TeamDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, code: &str, id: i64) {
        let code = code.trim().to_ascii_uppercase();
        if code.is_empty() {
            return;
        }
        let mut map = self.by_code.write().unwrap_or_else(|e| e.into_inner());
        map.insert(code, id);
    }

    pub fn register_teams(&self, teams: &[Team]) {
        for team in teams {
            self.register(&team.abbreviation, team.id);
        }
    }

    pub fn resolve(&self, code: &str) -> Option<i64> {
        let map = self.by_code.read().unwrap_or_else(|e| e.into_inner());
        map.get(&code.trim().to_ascii_uppercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.by_code.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `"Toronto Maple Leafs"` -> `("Leafs", "Toronto Maple")`.
pub fn split_team_name(name: &str) -> (String, String) {
    let mut tokens: Vec<&str> = name.split_whitespace().collect();
    match tokens.pop() {
        Some(last) => (last.to_string(), tokens.join(" ")),
        None => (String::new(), String::new()),
    }
}

/// `(shots - goals) / shots`, or 0 when no shots were faced.
pub fn save_percentage(shots_against: i64, goals_against: i64) -> f64 {
    if shots_against > 0 {
        (shots_against - goals_against) as f64 / shots_against as f64
    } else {
        0.0
    }
}

mod team_fields {
    use super::Candidates;

    pub const ID: Candidates = &[&["id"], &["team", "id"], &["teamId"]];
    pub const NAME: Candidates = &[
        &["name"],
        &["fullName"],
        &["teamName", "default"],
        &["team", "name"],
    ];
    pub const ABBREV: Candidates = &[
        &["abbreviation"],
        &["abbrev"],
        &["triCode"],
        &["teamAbbrev", "default"],
        &["team", "abbreviation"],
    ];
    pub const DIVISION_ID: Candidates = &[&["division", "id"], &["divisionId"]];
    pub const DIVISION_NAME: Candidates = &[&["division", "name"], &["divisionName"]];
    pub const CONFERENCE_ID: Candidates = &[&["conference", "id"], &["conferenceId"]];
    pub const CONFERENCE_NAME: Candidates = &[&["conference", "name"], &["conferenceName"]];
    pub const ACTIVE: Candidates = &[&["active"], &["isActive"]];
}

pub fn map_team(doc: &Value) -> Result<Team, Rejected> {
    use team_fields as f;
    if !doc.is_object() {
        return Err(Rejected::new("team", "document is not an object", doc));
    }
    let docs = [doc];
    let id = int_field(&docs, f::ID).ok_or_else(|| Rejected::new("team", "missing id", doc))?;
    let name = text_or(&docs, f::NAME, "");
    let (team_name, location_name) = split_team_name(&name);

    Ok(Team {
        id,
        abbreviation: text_or(&docs, f::ABBREV, ""),
        team_name,
        location_name,
        name,
        division_id: int_field(&docs, f::DIVISION_ID),
        division_name: text_field(&docs, f::DIVISION_NAME),
        conference_id: int_field(&docs, f::CONFERENCE_ID),
        conference_name: text_field(&docs, f::CONFERENCE_NAME),
        active: bool_or(&docs, f::ACTIVE, true),
    })
}

mod player_fields {
    use super::Candidates;

    pub const ID: Candidates = &[&["id"], &["playerId"], &["person", "id"]];
    pub const ROSTER_ID: Candidates = &[&["person", "id"], &["id"], &["playerId"]];
    pub const FIRST: Candidates = &[&["firstName", "default"], &["firstName"]];
    pub const LAST: Candidates = &[&["lastName", "default"], &["lastName"]];
    pub const FULL: Candidates = &[&["fullName"], &["person", "fullName"]];
    pub const NUMBER: Candidates = &[&["primaryNumber"], &["sweaterNumber"], &["jerseyNumber"]];
    pub const BIRTH_DATE: Candidates = &[&["birthDate"]];
    pub const POSITION: Candidates = &[
        &["primaryPosition", "code"],
        &["positionCode"],
        &["position", "code"],
        &["position"],
    ];
    pub const SHOOTS: Candidates = &[&["shootsCatches"]];
    pub const HEIGHT: Candidates = &[&["height"], &["heightInInches"]];
    pub const WEIGHT: Candidates = &[&["weight"], &["weightInPounds"]];
    pub const NATIONALITY: Candidates = &[&["nationality"], &["birthCountry"]];
    pub const ACTIVE: Candidates = &[&["active"], &["isActive"]];
    pub const ROOKIE: Candidates = &[&["rookie"]];
}

/// Player id carried by one roster entry, in either roster shape.
pub fn roster_player_id(entry: &Value) -> Option<i64> {
    int_field(&[entry], player_fields::ROSTER_ID)
}

/// Build a player from its detail document, falling back to the roster entry
/// for fields the detail lacks. `team_id` is the team whose roster listed it.
pub fn map_player(detail: &Value, entry: &Value, team_id: i64) -> Result<Player, Rejected> {
    use player_fields as f;
    if !detail.is_object() {
        return Err(Rejected::new("player", "detail is not an object", detail));
    }
    let docs = [detail, entry];
    let id = int_field(&docs, f::ID)
        .or_else(|| roster_player_id(entry))
        .ok_or_else(|| Rejected::new("player", "missing id", detail))?;

    let first_name = text_or(&docs, f::FIRST, "");
    let last_name = text_or(&docs, f::LAST, "");
    let full_name = text_field(&docs, f::FULL)
        .unwrap_or_else(|| format!("{first_name} {last_name}").trim().to_string());

    Ok(Player {
        id,
        full_name,
        first_name,
        last_name,
        primary_number: text_field(&docs, f::NUMBER),
        birth_date: date_field(&docs, f::BIRTH_DATE),
        current_team_id: Some(team_id),
        position: text_field(&docs, f::POSITION),
        shooter: text_field(&docs, f::SHOOTS),
        height: text_field(&docs, f::HEIGHT),
        weight: int_field(&docs, f::WEIGHT),
        nationality: text_field(&docs, f::NATIONALITY),
        active: bool_or(&docs, f::ACTIVE, true),
        rookie: bool_or(&docs, f::ROOKIE, false),
    })
}

/// Flatten `[{date, games: [..]}]` groups into individual game documents.
/// Non-object groups and games are returned as rejections.
pub fn flatten_schedule(groups: &[Value]) -> (Vec<&Value>, Vec<Rejected>) {
    let mut games = Vec::new();
    let mut rejected = Vec::new();
    for group in groups {
        let Some(list) = group.as_object().and_then(|g| g.get("games")) else {
            rejected.push(Rejected::new("schedule", "date group is not an object", group));
            continue;
        };
        let Some(list) = list.as_array() else {
            rejected.push(Rejected::new("schedule", "games is not a list", group));
            continue;
        };
        for game in list {
            if game.is_object() {
                games.push(game);
            } else {
                rejected.push(Rejected::new("game", "game is not an object", game));
            }
        }
    }
    (games, rejected)
}

mod game_fields {
    use super::Candidates;

    pub const ID: Candidates = &[&["gamePk"], &["id"]];
    pub const GAME_TYPE: Candidates = &[&["gameType"]];
    pub const DATE_TIME: Candidates = &[&["gameDate"], &["startTimeUTC"]];
    pub const AWAY_ID: Candidates = &[&["teams", "away", "team", "id"], &["awayTeam", "id"]];
    pub const HOME_ID: Candidates = &[&["teams", "home", "team", "id"], &["homeTeam", "id"]];
    pub const AWAY_CODE: Candidates = &[
        &["awayTeam", "abbrev"],
        &["teams", "away", "team", "abbreviation"],
    ];
    pub const HOME_CODE: Candidates = &[
        &["homeTeam", "abbrev"],
        &["teams", "home", "team", "abbreviation"],
    ];
    pub const VENUE: Candidates = &[&["venue", "name"], &["venue"]];
    pub const STATUS: Candidates = &[
        &["status", "detailedState"],
        &["gameState"],
        &["status", "abstractGameState"],
    ];
    pub const AWAY_NAME: Candidates = &[
        &["teams", "away", "team", "name"],
        &["awayTeam", "name", "default"],
    ];
    pub const HOME_NAME: Candidates = &[
        &["teams", "home", "team", "name"],
        &["homeTeam", "name", "default"],
    ];
    pub const AWAY_PLACE: Candidates = &[&["awayTeam", "placeName", "default"]];
    pub const HOME_PLACE: Candidates = &[&["homeTeam", "placeName", "default"]];
    pub const AWAY_COMMON: Candidates = &[&["awayTeam", "commonName", "default"]];
    pub const HOME_COMMON: Candidates = &[&["homeTeam", "commonName", "default"]];
    pub const AWAY_SCORE: Candidates = &[&["teams", "away", "score"], &["awayTeam", "score"]];
    pub const HOME_SCORE: Candidates = &[&["teams", "home", "score"], &["homeTeam", "score"]];
}

fn team_ref(
    docs: &[&Value],
    ids: Candidates,
    codes: Candidates,
    directory: &TeamDirectory,
) -> Option<i64> {
    int_field(docs, ids).or_else(|| {
        text_field(docs, codes).and_then(|code| directory.resolve(&code))
    })
}

/// Map one schedule game. The season is always the one requested, never the
/// document's own.
pub fn map_game(doc: &Value, season: &Season, directory: &TeamDirectory) -> Result<Game, Rejected> {
    use game_fields as f;
    if !doc.is_object() {
        return Err(Rejected::new("game", "document is not an object", doc));
    }
    let docs = [doc];
    let id = int_field(&docs, f::ID).ok_or_else(|| Rejected::new("game", "missing id", doc))?;
    let away_team_id = team_ref(&docs, f::AWAY_ID, f::AWAY_CODE, directory)
        .ok_or_else(|| Rejected::new("game", "away team not resolvable", doc))?;
    let home_team_id = team_ref(&docs, f::HOME_ID, f::HOME_CODE, directory)
        .ok_or_else(|| Rejected::new("game", "home team not resolvable", doc))?;

    Ok(Game {
        id,
        season: season.to_string(),
        game_type: text_or(&docs, f::GAME_TYPE, "2"),
        date_time: datetime_field(&docs, f::DATE_TIME),
        away_team_id,
        home_team_id,
        venue: text_field(&docs, f::VENUE),
        status: text_or(&docs, f::STATUS, ""),
        away_score: int_or(&docs, f::AWAY_SCORE, 0),
        home_score: int_or(&docs, f::HOME_SCORE, 0),
    })
}

/// Minimal team documents for both sides of a game, built from the fields the
/// game itself carries. Covers franchises missing from the current team list.
pub fn game_side_teams(doc: &Value, directory: &TeamDirectory) -> Vec<Value> {
    use game_fields as f;
    let docs = [doc];
    let sides = [
        (f::AWAY_ID, f::AWAY_CODE, f::AWAY_NAME, f::AWAY_PLACE, f::AWAY_COMMON),
        (f::HOME_ID, f::HOME_CODE, f::HOME_NAME, f::HOME_PLACE, f::HOME_COMMON),
    ];
    sides
        .into_iter()
        .filter_map(|(ids, codes, names, place, common)| {
            let id = team_ref(&docs, ids, codes, directory)?;
            let name = text_field(&docs, names).unwrap_or_else(|| {
                [text_field(&docs, place), text_field(&docs, common)]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ")
            });
            Some(json!({
                "id": id,
                "abbreviation": text_field(&docs, codes),
                "name": name,
                "active": false,
            }))
        })
        .collect()
}

/// One player line from a box score with the team it played for.
#[derive(Debug, Clone, Copy)]
pub struct BoxScoreEntry<'a> {
    pub team_id: Option<i64>,
    /// Id taken from the legacy `ID<n>` map key, when that shape was used.
    pub keyed_id: Option<i64>,
    pub doc: &'a Value,
}

const PLAYER_GROUPS: &[&str] = &["forwards", "defense", "defensemen", "goalies"];

const LEGACY_SIDE_ID: Candidates = &[&["team", "id"]];
const LEGACY_SIDE_CODE: Candidates = &[&["team", "abbreviation"], &["team", "triCode"]];
const CURRENT_SIDES: [(&str, Candidates, Candidates); 2] = [
    ("homeTeam", &[&["homeTeam", "id"]], &[&["homeTeam", "abbrev"]]),
    ("awayTeam", &[&["awayTeam", "id"]], &[&["awayTeam", "abbrev"]]),
];

/// Collect player lines for both sides of a box score in either shape.
pub fn box_score_entries<'a>(
    box_score: &'a Value,
    directory: &TeamDirectory,
) -> Vec<BoxScoreEntry<'a>> {
    let mut out = Vec::new();

    if let Some(teams) = lookup(box_score, &["teams"]) {
        for side in ["home", "away"] {
            let Some(team) = lookup(teams, &[side]) else {
                continue;
            };
            let team_id = team_ref(&[team], LEGACY_SIDE_ID, LEGACY_SIDE_CODE, directory);
            let Some(players) = lookup(team, &["players"]).and_then(Value::as_object) else {
                continue;
            };
            for (key, doc) in players {
                let Some(raw) = key.strip_prefix("ID") else {
                    continue;
                };
                out.push(BoxScoreEntry {
                    team_id,
                    keyed_id: raw.parse().ok(),
                    doc,
                });
            }
        }
    }

    if let Some(by_team) = lookup(box_score, &["playerByGameStats"]) {
        for (side, ids, codes) in CURRENT_SIDES {
            let Some(lines) = lookup(by_team, &[side]) else {
                continue;
            };
            let team_id = team_ref(&[box_score], ids, codes, directory);
            let mut push = |doc: &'a Value| {
                out.push(BoxScoreEntry {
                    team_id,
                    keyed_id: None,
                    doc,
                })
            };
            match lines {
                Value::Array(list) => list.iter().for_each(&mut push),
                Value::Object(groups) => PLAYER_GROUPS
                    .iter()
                    .filter_map(|g| groups.get(*g).and_then(Value::as_array))
                    .flatten()
                    .for_each(&mut push),
                _ => {}
            }
        }
    }

    out
}

/// A mapped box-score line.
#[derive(Debug, Clone, PartialEq)]
pub enum StatRecord {
    Skater(PlayerStat),
    Goalie(GoalieStat),
}

mod stat_fields {
    use super::Candidates;

    pub const PLAYER_ID: Candidates = &[&["playerId"], &["person", "id"], &["id"]];
    pub const POSITION: Candidates = &[&["position", "code"], &["positionCode"], &["position"]];

    pub const GOALS: Candidates = &[&["goals"]];
    pub const ASSISTS: Candidates = &[&["assists"]];
    pub const SHOTS: Candidates = &[&["shots"], &["sog"]];
    pub const HITS: Candidates = &[&["hits"]];
    pub const BLOCKED: Candidates = &[&["blocked"], &["blockedShots"]];
    pub const PIM: Candidates = &[&["penaltyMinutes"], &["pim"]];
    pub const TOI: Candidates = &[&["timeOnIce"], &["toi"]];

    pub const SHOTS_AGAINST: Candidates = &[&["shots"], &["shotsAgainst"]];
    pub const SAVES: Candidates = &[&["saves"]];
    pub const GOALS_AGAINST: Candidates = &[&["goals"], &["goalsAgainst"]];
    pub const DECISION: Candidates = &[&["decision"]];
    pub const SAVE_SHOTS: Candidates = &[&["saveShotsAgainst"]];

    /// Keys whose presence marks an inline (current-shape) skater line.
    pub const SKATER_MARKERS: &[&str] = &["toi", "goals", "sog", "assists", "timeOnIce"];
}

enum StatLine<'a> {
    Skater(&'a Value),
    Goalie(&'a Value),
    Empty,
}

fn classify<'a>(doc: &'a Value, position: Option<&str>) -> StatLine<'a> {
    if let Some(stats) = lookup(doc, &["stats"]) {
        if let Some(goalie) = lookup(stats, &["goalieStats"]) {
            return StatLine::Goalie(goalie);
        }
        if let Some(skater) = lookup(stats, &["skaterStats"]) {
            return StatLine::Skater(skater);
        }
        return StatLine::Empty;
    }
    if position == Some("G") {
        return StatLine::Goalie(doc);
    }
    let inline = doc
        .as_object()
        .map(|o| stat_fields::SKATER_MARKERS.iter().any(|k| o.contains_key(*k)))
        .unwrap_or(false);
    if inline {
        StatLine::Skater(doc)
    } else {
        StatLine::Empty
    }
}

/// Parse the `"saves/shots"` summary string.
fn split_save_shots(raw: &str) -> Option<(i64, i64)> {
    let (saves, shots) = raw.split_once('/')?;
    Some((saves.trim().parse().ok()?, shots.trim().parse().ok()?))
}

/// Map one box-score line to a skater or goalie row for `game_id`.
pub fn map_box_score_entry(entry: &BoxScoreEntry<'_>, game_id: i64) -> Result<StatRecord, Rejected> {
    use stat_fields as f;
    let doc = entry.doc;
    if !doc.is_object() {
        return Err(Rejected::new("box score", "entry is not an object", doc));
    }
    let docs = [doc];
    let player_id = entry
        .keyed_id
        .or_else(|| int_field(&docs, f::PLAYER_ID))
        .ok_or_else(|| Rejected::new("box score", "missing player id", doc))?;
    let team_id = entry
        .team_id
        .ok_or_else(|| Rejected::new("box score", "team not resolvable", doc))?;
    let position = text_field(&docs, f::POSITION);

    match classify(doc, position.as_deref()) {
        StatLine::Empty => Err(Rejected::new("box score", "no stats recorded", doc)),
        StatLine::Skater(stats) => {
            let s = [stats];
            Ok(StatRecord::Skater(PlayerStat {
                player_id,
                game_id,
                team_id,
                position,
                goals: int_or(&s, f::GOALS, 0),
                assists: int_or(&s, f::ASSISTS, 0),
                shots: int_or(&s, f::SHOTS, 0),
                hits: int_or(&s, f::HITS, 0),
                blocked_shots: int_or(&s, f::BLOCKED, 0),
                penalty_minutes: int_or(&s, f::PIM, 0),
                time_on_ice: text_field(&s, f::TOI),
            }))
        }
        StatLine::Goalie(stats) => {
            let s = [stats];
            let summary = first_present(&s, f::SAVE_SHOTS)
                .and_then(value_as_string)
                .and_then(|raw| split_save_shots(&raw));
            let shots_against = int_field(&s, f::SHOTS_AGAINST)
                .or(summary.map(|(_, shots)| shots))
                .unwrap_or(0);
            let saves = int_field(&s, f::SAVES)
                .or(summary.map(|(saves, _)| saves))
                .unwrap_or(0);
            let goals_against = first_present(&s, f::GOALS_AGAINST)
                .and_then(value_as_i64)
                .unwrap_or(0);
            Ok(StatRecord::Goalie(GoalieStat {
                player_id,
                game_id,
                team_id,
                shots_against,
                saves,
                goals_against,
                time_on_ice: text_field(&s, f::TOI),
                decision: text_field(&s, f::DECISION),
                save_percentage: save_percentage(shots_against, goals_against),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn split_team_name_uses_last_token() {
        assert_eq!(
            split_team_name("Toronto Maple Leafs"),
            ("Leafs".to_string(), "Toronto Maple".to_string())
        );
        assert_eq!(split_team_name("Kraken"), ("Kraken".to_string(), String::new()));
        assert_eq!(split_team_name(""), (String::new(), String::new()));
        assert_eq!(split_team_name("   "), (String::new(), String::new()));
    }

    #[test]
    fn split_team_name_round_trips_single_spaced_names() {
        for name in ["Boston Bruins", "New York Rangers", "St. Louis Blues", "Utah Hockey Club"] {
            let (team, location) = split_team_name(name);
            assert_eq!(format!("{location} {team}"), name);
        }
    }

    #[test]
    fn save_percentage_handles_zero_shots() {
        assert_eq!(save_percentage(0, 0), 0.0);
        assert!((save_percentage(30, 3) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn maps_legacy_team_document() {
        let doc = json!({
            "id": 10,
            "name": "Toronto Maple Leafs",
            "abbreviation": "TOR",
            "division": { "id": 17, "name": "Atlantic" },
            "conference": { "id": 6, "name": "Eastern" },
            "active": true
        });
        let team = map_team(&doc).unwrap();
        assert_eq!(team.id, 10);
        assert_eq!(team.team_name, "Leafs");
        assert_eq!(team.location_name, "Toronto Maple");
        assert_eq!(team.division_id, Some(17));
        assert_eq!(team.conference_name.as_deref(), Some("Eastern"));
        assert!(team.active);
    }

    #[test]
    fn maps_standings_shaped_team_document() {
        let doc = json!({
            "teamId": "6",
            "teamName": { "default": "Boston Bruins" },
            "teamAbbrev": { "default": "BOS" },
            "divisionName": "Atlantic",
            "conferenceName": "Eastern"
        });
        let team = map_team(&doc).unwrap();
        assert_eq!(team.id, 6);
        assert_eq!(team.name, "Boston Bruins");
        assert_eq!(team.abbreviation, "BOS");
        assert_eq!(team.division_id, None);
        assert_eq!(team.division_name.as_deref(), Some("Atlantic"));
        assert!(team.active);
    }

    #[test]
    fn team_without_id_or_not_an_object_is_rejected() {
        let err = map_team(&json!({ "name": "Nobody" })).unwrap_err();
        assert_eq!(err.entity, "team");
        assert_eq!(err.document, json!({ "name": "Nobody" }));
        assert!(map_team(&json!("BOS")).is_err());
    }

    #[test]
    fn player_prefers_detail_and_falls_back_to_roster_entry() {
        let detail = json!({
            "playerId": 8478402,
            "firstName": { "default": "Connor" },
            "lastName": { "default": "McDavid" },
            "birthDate": "1997-01-13",
            "position": "C",
            "shootsCatches": "L",
            "heightInInches": 73,
            "weightInPounds": 194,
            "birthCountry": "CAN"
        });
        let entry = json!({
            "person": { "id": 8478402, "fullName": "Connor McDavid" },
            "jerseyNumber": "97",
            "position": { "code": "C" }
        });
        let player = map_player(&detail, &entry, 22).unwrap();
        assert_eq!(player.id, 8478402);
        assert_eq!(player.full_name, "Connor McDavid");
        assert_eq!(player.first_name, "Connor");
        assert_eq!(player.primary_number.as_deref(), Some("97"));
        assert_eq!(player.position.as_deref(), Some("C"));
        assert_eq!(player.height.as_deref(), Some("73"));
        assert_eq!(player.weight, Some(194));
        assert_eq!(player.nationality.as_deref(), Some("CAN"));
        assert_eq!(player.current_team_id, Some(22));
        assert!(player.active);
        assert!(!player.rookie);
    }

    #[test]
    fn player_full_name_is_composed_when_absent() {
        let detail = json!({ "id": 1, "firstName": "Jack", "lastName": "Hughes" });
        let player = map_player(&detail, &json!({}), 1).unwrap();
        assert_eq!(player.full_name, "Jack Hughes");
    }

    #[test]
    fn flatten_schedule_skips_malformed_items() {
        let groups = vec![
            json!({ "date": "2022-10-07", "games": [{ "id": 1 }, "garbage"] }),
            json!("not a group"),
            json!({ "date": "2022-10-08", "games": [{ "id": 2 }] }),
        ];
        let (games, rejected) = flatten_schedule(&groups);
        assert_eq!(games.len(), 2);
        assert_eq!(rejected.len(), 2);
    }

    #[test]
    fn game_resolves_team_codes_through_directory() {
        let directory = TeamDirectory::new();
        directory.register("NSH", 18);
        directory.register("sjs", 28);
        let doc = json!({
            "id": 2022020001,
            "gameType": 2,
            "startTimeUTC": "2022-10-07T18:00:00Z",
            "gameState": "OFF",
            "venue": { "default": "O2 Czech Republic" },
            "awayTeam": { "abbrev": "SJS", "score": 1 },
            "homeTeam": { "abbrev": "NSH", "score": 4 }
        });
        let game = map_game(&doc, &Season::starting(2022), &directory).unwrap();
        assert_eq!(game.season, "20222023");
        assert_eq!(game.game_type, "2");
        assert_eq!(game.away_team_id, 28);
        assert_eq!(game.home_team_id, 18);
        assert_eq!(game.venue.as_deref(), Some("O2 Czech Republic"));
        assert_eq!(game.status, "OFF");
        assert_eq!((game.away_score, game.home_score), (1, 4));
    }

    #[test]
    fn legacy_game_uses_nested_ids_and_defaults() {
        let doc = json!({
            "gamePk": 2019020001,
            "gameDate": "2019-10-02T23:00:00Z",
            "status": { "detailedState": "Final" },
            "teams": {
                "away": { "team": { "id": 9 } },
                "home": { "team": { "id": 10 }, "score": 5 }
            },
            "venue": { "name": "Scotiabank Arena" }
        });
        let game = map_game(&doc, &Season::starting(2019), &TeamDirectory::new()).unwrap();
        assert_eq!(game.away_team_id, 9);
        assert_eq!(game.away_score, 0);
        assert_eq!(game.home_score, 5);
        assert_eq!(game.status, "Final");
        assert_eq!(game.venue.as_deref(), Some("Scotiabank Arena"));
    }

    #[test]
    fn game_with_unknown_team_is_rejected() {
        let doc = json!({ "id": 1, "awayTeam": { "abbrev": "XXX" }, "homeTeam": { "id": 3 } });
        let err = map_game(&doc, &Season::starting(2022), &TeamDirectory::new()).unwrap_err();
        assert_eq!(err.reason, "away team not resolvable");
    }

    #[test]
    fn game_sides_become_minimal_team_documents() {
        let doc = json!({
            "id": 2022020001,
            "awayTeam": { "id": 99, "abbrev": "QUE",
                          "placeName": { "default": "Quebec" }, "commonName": { "default": "Nordiques" } },
            "homeTeam": { "abbrev": "TOR" }
        });
        let directory = TeamDirectory::new();
        directory.register("TOR", 10);
        let sides = game_side_teams(&doc, &directory);
        assert_eq!(sides.len(), 2);
        let away = map_team(&sides[0]).unwrap();
        assert_eq!(away.id, 99);
        assert_eq!(away.name, "Quebec Nordiques");
        assert_eq!(away.abbreviation, "QUE");
        assert!(!away.active);
        assert_eq!(sides[1]["id"], json!(10));

        let legacy = json!({ "teams": {
            "away": { "team": { "id": 11, "name": "Atlanta Thrashers" } },
            "home": { "team": {} }
        }});
        let sides = game_side_teams(&legacy, &TeamDirectory::new());
        assert_eq!(sides.len(), 1);
        assert_eq!(map_team(&sides[0]).unwrap().location_name, "Atlanta");
    }

    #[test]
    fn legacy_box_score_branches_on_stat_shape() {
        let box_score = json!({
            "teams": {
                "home": {
                    "team": { "id": 10 },
                    "players": {
                        "ID8479318": {
                            "position": { "code": "C" },
                            "stats": { "skaterStats": { "goals": 2, "assists": 1, "shots": 5, "blocked": 1, "timeOnIce": "19:02" } }
                        },
                        "ID8475883": {
                            "position": { "code": "G" },
                            "stats": { "goalieStats": { "shots": 30, "saves": 27, "goals": 3, "decision": "W" } }
                        },
                        "ID8470000": { "stats": {} },
                        "coaches": {}
                    }
                }
            }
        });
        let entries = box_score_entries(&box_score, &TeamDirectory::new());
        assert_eq!(entries.len(), 3);

        let mut skaters = 0;
        let mut goalies = 0;
        let mut rejected = 0;
        for entry in &entries {
            match map_box_score_entry(entry, 2019020001) {
                Ok(StatRecord::Skater(s)) => {
                    skaters += 1;
                    assert_eq!(s.player_id, 8479318);
                    assert_eq!(s.goals, 2);
                    assert_eq!(s.blocked_shots, 1);
                    assert_eq!(s.team_id, 10);
                }
                Ok(StatRecord::Goalie(g)) => {
                    goalies += 1;
                    assert_eq!(g.player_id, 8475883);
                    assert!((g.save_percentage - 0.9).abs() < 1e-9);
                    assert_eq!(g.decision.as_deref(), Some("W"));
                }
                Err(_) => rejected += 1,
            }
        }
        assert_eq!((skaters, goalies, rejected), (1, 1, 1));
    }

    #[test]
    fn current_box_score_groups_and_save_shot_fallback() {
        let directory = TeamDirectory::new();
        directory.register("EDM", 22);
        let box_score = json!({
            "homeTeam": { "id": 25, "abbrev": "DAL" },
            "awayTeam": { "abbrev": "EDM" },
            "playerByGameStats": {
                "homeTeam": {
                    "forwards": [{ "playerId": 1, "position": "C", "goals": 1, "sog": 3, "pim": 2, "toi": "15:00" }],
                    "goalies": [{ "playerId": 2, "position": "G", "saveShotsAgainst": "28/30", "goalsAgainst": 2, "toi": "60:00" }]
                },
                "awayTeam": [{ "playerId": 3, "position": "D", "blockedShots": 4, "toi": "22:10" }]
            }
        });
        let entries = box_score_entries(&box_score, &directory);
        assert_eq!(entries.len(), 3);
        let records: Vec<StatRecord> = entries
            .iter()
            .map(|e| map_box_score_entry(e, 99).unwrap())
            .collect();

        match &records[1] {
            StatRecord::Goalie(g) => {
                assert_eq!((g.saves, g.shots_against, g.goals_against), (28, 30, 2));
                assert_eq!(g.team_id, 25);
            }
            other => panic!("expected goalie, got {other:?}"),
        }
        match &records[2] {
            StatRecord::Skater(s) => {
                assert_eq!(s.team_id, 22);
                assert_eq!(s.blocked_shots, 4);
                assert_eq!(s.position.as_deref(), Some("D"));
            }
            other => panic!("expected skater, got {other:?}"),
        }
    }

    #[test]
    fn box_score_entry_without_team_is_rejected() {
        let doc = json!({ "playerId": 5, "goals": 1 });
        let entry = BoxScoreEntry {
            team_id: None,
            keyed_id: None,
            doc: &doc,
        };
        assert!(map_box_score_entry(&entry, 1).is_err());
    }
}
