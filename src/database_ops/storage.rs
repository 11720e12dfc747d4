use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::backfill::Season;
use super::records::{Game, Record, SqlValue, Team};

/// Game statuses treated as finished when selecting box scores to sync.
pub const COMPLETED_STATUSES: &[&str] = &["Final", "Official", "FINAL", "OFF"];

/// Tables written by the sync, in dependency order.
pub const TABLES: &[&str] = &["teams", "players", "games", "player_stats", "goalie_stats"];

/// Rows bound for one table, already reduced to one row per key.
#[derive(Debug, Clone)]
pub struct UpsertBatch {
    pub table: &'static str,
    pub columns: &'static [&'static str],
    pub key_fields: &'static [&'static str],
    pub rows: Vec<Vec<SqlValue>>,
}

impl UpsertBatch {
    /// Build a batch from typed records. Rows sharing a key collapse to the
    /// last one, kept at the position the key was first seen.
    pub fn from_records<R: Record>(records: &[R]) -> Self {
        let mut batch = Self {
            table: R::TABLE,
            columns: R::COLUMNS,
            key_fields: R::KEY_FIELDS,
            rows: Vec::with_capacity(records.len()),
        };
        let key_idx = batch.key_indices();
        let mut seen: HashMap<Vec<String>, usize> = HashMap::new();
        for record in records {
            let row = record.values();
            let key: Vec<String> = key_idx.iter().map(|i| row[*i].key_repr()).collect();
            match seen.get(&key) {
                Some(pos) => batch.rows[*pos] = row,
                None => {
                    seen.insert(key, batch.rows.len());
                    batch.rows.push(row);
                }
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn key_indices(&self) -> Vec<usize> {
        self.key_fields
            .iter()
            .filter_map(|k| self.columns.iter().position(|c| c == k))
            .collect()
    }

    /// Reject rows of the wrong width or with a null key before touching storage.
    pub fn validate(&self) -> Result<()> {
        let key_idx = self.key_indices();
        if key_idx.len() != self.key_fields.len() {
            bail!("{}: key fields {:?} not all in columns", self.table, self.key_fields);
        }
        for (n, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                bail!(
                    "{}: row {n} has {} values, expected {}",
                    self.table,
                    row.len(),
                    self.columns.len()
                );
            }
            if key_idx.iter().any(|i| row[*i].is_null()) {
                bail!("{}: row {n} has a null key", self.table);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub table: String,
    pub rows: i64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Relational sink for mapped records.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert new rows and overwrite every non-key column of existing ones, in
    /// one atomic call. Returns the affected-row count.
    async fn upsert(&self, batch: &UpsertBatch) -> Result<u64>;

    /// Ids of games in `season` whose status is in [`COMPLETED_STATUSES`].
    async fn completed_game_ids(&self, season: &Season) -> Result<Vec<i64>>;

    /// `(abbreviation, id)` for every stored team.
    async fn team_codes(&self) -> Result<Vec<(String, i64)>>;

    async fn table_summaries(&self) -> Result<Vec<TableSummary>>;

    async fn init_schema(&self) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemTable {
    rows: Vec<Vec<SqlValue>>,
    updated: Vec<DateTime<Utc>>,
    by_key: HashMap<Vec<String>, usize>,
}

/// In-process [`Storage`] with the same upsert semantics as Postgres. Backs
/// `--dry-run` and the tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<&'static str, MemTable>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables.get(table).map(|t| t.rows.len()).unwrap_or(0)
    }

    /// All rows of `table` in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Vec<SqlValue>> {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables.get(table).map(|t| t.rows.clone()).unwrap_or_default()
    }

    /// One column of the row whose key renders as `key`.
    pub fn value<R: Record>(&self, key: &[&str], column: &str) -> Option<SqlValue> {
        let col = R::COLUMNS.iter().position(|c| *c == column)?;
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let table = tables.get(R::TABLE)?;
        let key: Vec<String> = key.iter().map(|k| k.to_string()).collect();
        let pos = table.by_key.get(&key)?;
        table.rows.get(*pos).and_then(|r| r.get(col)).cloned()
    }
}

fn column_index<R: Record>(name: &str) -> Result<usize> {
    match R::COLUMNS.iter().position(|c| *c == name) {
        Some(i) => Ok(i),
        None => bail!("{} has no column {name}", R::TABLE),
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn upsert(&self, batch: &UpsertBatch) -> Result<u64> {
        batch.validate()?;
        let key_idx = batch.key_indices();
        let now = Utc::now();
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let table = tables.entry(batch.table).or_default();
        for row in &batch.rows {
            let key: Vec<String> = key_idx.iter().map(|i| row[*i].key_repr()).collect();
            match table.by_key.get(&key) {
                Some(pos) => {
                    table.rows[*pos] = row.clone();
                    table.updated[*pos] = now;
                }
                None => {
                    table.by_key.insert(key, table.rows.len());
                    table.rows.push(row.clone());
                    table.updated.push(now);
                }
            }
        }
        Ok(batch.rows.len() as u64)
    }

    async fn completed_game_ids(&self, season: &Season) -> Result<Vec<i64>> {
        let id_col = column_index::<Game>("id")?;
        let season_col = column_index::<Game>("season")?;
        let status_col = column_index::<Game>("status")?;
        let season = season.to_string();
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let Some(games) = tables.get(Game::TABLE) else {
            return Ok(Vec::new());
        };
        Ok(games
            .rows
            .iter()
            .filter(|r| r[season_col].as_str() == Some(season.as_str()))
            .filter(|r| {
                r[status_col]
                    .as_str()
                    .is_some_and(|s| COMPLETED_STATUSES.contains(&s))
            })
            .filter_map(|r| r[id_col].as_i64())
            .collect())
    }

    async fn team_codes(&self) -> Result<Vec<(String, i64)>> {
        let id_col = column_index::<Team>("id")?;
        let code_col = column_index::<Team>("abbreviation")?;
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let Some(teams) = tables.get(Team::TABLE) else {
            return Ok(Vec::new());
        };
        Ok(teams
            .rows
            .iter()
            .filter_map(|r| Some((r[code_col].as_str()?.to_string(), r[id_col].as_i64()?)))
            .collect())
    }

    async fn table_summaries(&self) -> Result<Vec<TableSummary>> {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        Ok(TABLES
            .iter()
            .map(|name| {
                let t = tables.get(name);
                TableSummary {
                    table: name.to_string(),
                    rows: t.map(|t| t.rows.len() as i64).unwrap_or(0),
                    last_updated: t.and_then(|t| t.updated.iter().max().copied()),
                }
            })
            .collect())
    }

    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::records::GoalieStat;

    fn team(id: i64, code: &str, name: &str) -> Team {
        Team {
            id,
            name: name.to_string(),
            abbreviation: code.to_string(),
            team_name: String::new(),
            location_name: String::new(),
            division_id: None,
            division_name: None,
            conference_id: None,
            conference_name: None,
            active: true,
        }
    }

    fn game(id: i64, season: &str, status: &str) -> Game {
        Game {
            id,
            season: season.to_string(),
            game_type: "2".to_string(),
            date_time: None,
            away_team_id: 1,
            home_team_id: 2,
            venue: None,
            status: status.to_string(),
            away_score: 0,
            home_score: 0,
        }
    }

    #[test]
    fn duplicate_keys_collapse_to_last_row_in_first_position() {
        let batch = UpsertBatch::from_records(&[
            team(1, "NJD", "old"),
            team(2, "NYI", "Islanders"),
            team(1, "NJD", "New Jersey Devils"),
        ]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.rows[0][0], SqlValue::from(1));
        assert_eq!(batch.rows[0][1], SqlValue::from("New Jersey Devils"));
    }

    #[test]
    fn validate_rejects_short_rows_and_null_keys() {
        let mut batch = UpsertBatch::from_records(&[team(1, "NJD", "Devils")]);
        batch.rows[0].pop();
        assert!(batch.validate().is_err());

        let mut batch = UpsertBatch::from_records(&[team(1, "NJD", "Devils")]);
        batch.rows[0][0] = SqlValue::Int(None);
        assert!(batch.validate().is_err());
    }

    #[tokio::test]
    async fn upsert_overwrites_non_key_columns() {
        let store = MemoryStore::new();
        let n = store
            .upsert(&UpsertBatch::from_records(&[team(6, "BOS", "Boston")]))
            .await
            .unwrap();
        assert_eq!(n, 1);
        store
            .upsert(&UpsertBatch::from_records(&[team(6, "BOS", "Boston Bruins")]))
            .await
            .unwrap();
        assert_eq!(store.row_count("teams"), 1);
        assert_eq!(
            store.value::<Team>(&["6"], "name"),
            Some(SqlValue::from("Boston Bruins"))
        );
    }

    #[tokio::test]
    async fn composite_keys_are_distinct_per_game() {
        let store = MemoryStore::new();
        let line = |game_id| GoalieStat {
            player_id: 30,
            game_id,
            team_id: 6,
            shots_against: 30,
            saves: 27,
            goals_against: 3,
            time_on_ice: None,
            decision: None,
            save_percentage: 0.9,
        };
        store
            .upsert(&UpsertBatch::from_records(&[line(1), line(2), line(1)]))
            .await
            .unwrap();
        assert_eq!(store.row_count("goalie_stats"), 2);
    }

    #[tokio::test]
    async fn completed_games_filter_by_season_and_status() {
        let store = MemoryStore::new();
        store
            .upsert(&UpsertBatch::from_records(&[
                game(1, "20222023", "Final"),
                game(2, "20222023", "OFF"),
                game(3, "20222023", "FUT"),
                game(4, "20212022", "Final"),
            ]))
            .await
            .unwrap();
        let mut ids = store
            .completed_game_ids(&Season::starting(2022))
            .await
            .unwrap();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn summaries_cover_every_table() {
        let store = MemoryStore::new();
        store
            .upsert(&UpsertBatch::from_records(&[team(6, "BOS", "Bruins")]))
            .await
            .unwrap();
        let summaries = store.table_summaries().await.unwrap();
        assert_eq!(summaries.len(), TABLES.len());
        assert_eq!(summaries[0].rows, 1);
        assert!(summaries[0].last_updated.is_some());
        assert_eq!(summaries[1].rows, 0);
        assert_eq!(store.team_codes().await.unwrap(), vec![("BOS".to_string(), 6)]);
    }
}
