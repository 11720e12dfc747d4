use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// A typed column value. Nulls keep their column type so the Postgres binder
/// sends the right parameter type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Int(Option<i64>),
    Float(Option<f64>),
    Text(Option<String>),
    Bool(Option<bool>),
    Timestamp(Option<DateTime<Utc>>),
    Date(Option<NaiveDate>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        match self {
            SqlValue::Int(v) => v.is_none(),
            SqlValue::Float(v) => v.is_none(),
            SqlValue::Text(v) => v.is_none(),
            SqlValue::Bool(v) => v.is_none(),
            SqlValue::Timestamp(v) => v.is_none(),
            SqlValue::Date(v) => v.is_none(),
        }
    }

    /// Stable textual form used to compare key columns.
    pub fn key_repr(&self) -> String {
        match self {
            SqlValue::Int(Some(v)) => v.to_string(),
            SqlValue::Float(Some(v)) => v.to_string(),
            SqlValue::Text(Some(v)) => v.clone(),
            SqlValue::Bool(Some(v)) => v.to_string(),
            SqlValue::Timestamp(Some(v)) => v.to_rfc3339(),
            SqlValue::Date(Some(v)) => v.to_string(),
            _ => String::new(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => *v,
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => v.as_deref(),
            _ => None,
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(Some(v))
    }
}

impl From<Option<i64>> for SqlValue {
    fn from(v: Option<i64>) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(Some(v))
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(Some(v.to_string()))
    }
}

impl From<&String> for SqlValue {
    fn from(v: &String) -> Self {
        SqlValue::Text(Some(v.clone()))
    }
}

impl From<&Option<String>> for SqlValue {
    fn from(v: &Option<String>) -> Self {
        SqlValue::Text(v.clone())
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(Some(v))
    }
}

impl From<Option<DateTime<Utc>>> for SqlValue {
    fn from(v: Option<DateTime<Utc>>) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl From<Option<NaiveDate>> for SqlValue {
    fn from(v: Option<NaiveDate>) -> Self {
        SqlValue::Date(v)
    }
}

/// A persisted entity: fixed table, column order, and natural key.
pub trait Record {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];
    const KEY_FIELDS: &'static [&'static str];

    /// One value per entry of `COLUMNS`, same order.
    fn values(&self) -> Vec<SqlValue>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub abbreviation: String,
    pub team_name: String,
    pub location_name: String,
    pub division_id: Option<i64>,
    pub division_name: Option<String>,
    pub conference_id: Option<i64>,
    pub conference_name: Option<String>,
    pub active: bool,
}

impl Record for Team {
    const TABLE: &'static str = "teams";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "abbreviation",
        "team_name",
        "location_name",
        "division_id",
        "division_name",
        "conference_id",
        "conference_name",
        "active",
    ];
    const KEY_FIELDS: &'static [&'static str] = &["id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.into(),
            (&self.name).into(),
            (&self.abbreviation).into(),
            (&self.team_name).into(),
            (&self.location_name).into(),
            self.division_id.into(),
            (&self.division_name).into(),
            self.conference_id.into(),
            (&self.conference_name).into(),
            self.active.into(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Player {
    pub id: i64,
    pub full_name: String,
    pub first_name: String,
    pub last_name: String,
    pub primary_number: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub current_team_id: Option<i64>,
    pub position: Option<String>,
    pub shooter: Option<String>,
    pub height: Option<String>,
    pub weight: Option<i64>,
    pub nationality: Option<String>,
    pub active: bool,
    pub rookie: bool,
}

impl Record for Player {
    const TABLE: &'static str = "players";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "full_name",
        "first_name",
        "last_name",
        "primary_number",
        "birth_date",
        "current_team_id",
        "position",
        "shooter",
        "height",
        "weight",
        "nationality",
        "active",
        "rookie",
    ];
    const KEY_FIELDS: &'static [&'static str] = &["id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.into(),
            (&self.full_name).into(),
            (&self.first_name).into(),
            (&self.last_name).into(),
            (&self.primary_number).into(),
            self.birth_date.into(),
            self.current_team_id.into(),
            (&self.position).into(),
            (&self.shooter).into(),
            (&self.height).into(),
            self.weight.into(),
            (&self.nationality).into(),
            self.active.into(),
            self.rookie.into(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Game {
    pub id: i64,
    pub season: String,
    pub game_type: String,
    pub date_time: Option<DateTime<Utc>>,
    pub away_team_id: i64,
    pub home_team_id: i64,
    pub venue: Option<String>,
    pub status: String,
    pub away_score: i64,
    pub home_score: i64,
}

impl Record for Game {
    const TABLE: &'static str = "games";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "season",
        "game_type",
        "date_time",
        "away_team_id",
        "home_team_id",
        "venue",
        "status",
        "away_score",
        "home_score",
    ];
    const KEY_FIELDS: &'static [&'static str] = &["id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.into(),
            (&self.season).into(),
            (&self.game_type).into(),
            self.date_time.into(),
            self.away_team_id.into(),
            self.home_team_id.into(),
            (&self.venue).into(),
            (&self.status).into(),
            self.away_score.into(),
            self.home_score.into(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerStat {
    pub player_id: i64,
    pub game_id: i64,
    pub team_id: i64,
    pub position: Option<String>,
    pub goals: i64,
    pub assists: i64,
    pub shots: i64,
    pub hits: i64,
    pub blocked_shots: i64,
    pub penalty_minutes: i64,
    pub time_on_ice: Option<String>,
}

impl Record for PlayerStat {
    const TABLE: &'static str = "player_stats";
    const COLUMNS: &'static [&'static str] = &[
        "player_id",
        "game_id",
        "team_id",
        "position",
        "goals",
        "assists",
        "shots",
        "hits",
        "blocked_shots",
        "penalty_minutes",
        "time_on_ice",
    ];
    const KEY_FIELDS: &'static [&'static str] = &["player_id", "game_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.player_id.into(),
            self.game_id.into(),
            self.team_id.into(),
            (&self.position).into(),
            self.goals.into(),
            self.assists.into(),
            self.shots.into(),
            self.hits.into(),
            self.blocked_shots.into(),
            self.penalty_minutes.into(),
            (&self.time_on_ice).into(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalieStat {
    pub player_id: i64,
    pub game_id: i64,
    pub team_id: i64,
    pub shots_against: i64,
    pub saves: i64,
    pub goals_against: i64,
    pub time_on_ice: Option<String>,
    pub decision: Option<String>,
    pub save_percentage: f64,
}

impl Record for GoalieStat {
    const TABLE: &'static str = "goalie_stats";
    const COLUMNS: &'static [&'static str] = &[
        "player_id",
        "game_id",
        "team_id",
        "shots_against",
        "saves",
        "goals_against",
        "time_on_ice",
        "decision",
        "save_percentage",
    ];
    const KEY_FIELDS: &'static [&'static str] = &["player_id", "game_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.player_id.into(),
            self.game_id.into(),
            self.team_id.into(),
            self.shots_against.into(),
            self.saves.into(),
            self.goals_against.into(),
            (&self.time_on_ice).into(),
            (&self.decision).into(),
            self.save_percentage.into(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_shape<R: Record>(record: &R) {
        let values = record.values();
        assert_eq!(values.len(), R::COLUMNS.len(), "{}", R::TABLE);
        for key in R::KEY_FIELDS {
            let idx = R::COLUMNS.iter().position(|c| c == key).unwrap();
            assert!(!values[idx].is_null(), "{}.{key} is null", R::TABLE);
        }
    }

    #[test]
    fn every_record_matches_its_column_list() {
        assert_shape(&Team {
            id: 6,
            name: "Boston Bruins".into(),
            abbreviation: "BOS".into(),
            team_name: "Bruins".into(),
            location_name: "Boston".into(),
            division_id: None,
            division_name: None,
            conference_id: None,
            conference_name: None,
            active: true,
        });
        assert_shape(&Player {
            id: 8478402,
            full_name: "Connor McDavid".into(),
            first_name: "Connor".into(),
            last_name: "McDavid".into(),
            primary_number: Some("97".into()),
            birth_date: NaiveDate::from_ymd_opt(1997, 1, 13),
            current_team_id: Some(22),
            position: Some("C".into()),
            shooter: Some("L".into()),
            height: Some("73".into()),
            weight: Some(194),
            nationality: Some("CAN".into()),
            active: true,
            rookie: false,
        });
        assert_shape(&Game {
            id: 2022020001,
            season: "20222023".into(),
            game_type: "2".into(),
            date_time: None,
            away_team_id: 18,
            home_team_id: 3,
            venue: None,
            status: "OFF".into(),
            away_score: 0,
            home_score: 0,
        });
        assert_shape(&PlayerStat {
            player_id: 1,
            game_id: 2,
            team_id: 3,
            position: None,
            goals: 0,
            assists: 0,
            shots: 0,
            hits: 0,
            blocked_shots: 0,
            penalty_minutes: 0,
            time_on_ice: None,
        });
        assert_shape(&GoalieStat {
            player_id: 1,
            game_id: 2,
            team_id: 3,
            shots_against: 0,
            saves: 0,
            goals_against: 0,
            time_on_ice: None,
            decision: None,
            save_percentage: 0.0,
        });
    }

    #[test]
    fn key_repr_is_type_agnostic_text() {
        assert_eq!(SqlValue::from(42).key_repr(), "42");
        assert_eq!(SqlValue::from("BOS").key_repr(), "BOS");
        assert_eq!(SqlValue::Int(None).key_repr(), "");
    }
}
