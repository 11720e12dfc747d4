use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool, Postgres, QueryBuilder, Row,
};
use tracing::{info, instrument, warn};

use super::backfill::Season;
use super::records::SqlValue;
use super::storage::{Storage, TableSummary, UpsertBatch, COMPLETED_STATUSES, TABLES};
use crate::util::env::env_flag;

/// Postgres caps one statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;

const MIGRATIONS_DIR: &str = "./migrations";

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    /// Connect and, when `AUTO_MIGRATE` is on, apply pending migrations.
    // never include raw DSNs in tracing spans (they carry credentials)
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let db = Self::connect_no_migrate(database_url, max_connections).await?;
        if env_flag("AUTO_MIGRATE", false) {
            info!("running migrations (AUTO_MIGRATE=on)");
            db.run_migrations().await?;
        } else {
            info!("AUTO_MIGRATE disabled; skipping migrations");
        }
        Ok(db)
    }

    #[instrument(skip(database_url))]
    pub async fn connect_no_migrate(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options = PgConnectOptions::from_str(database_url)
            .context("parsing database url")?
            .statement_cache_capacity(0);
        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await
            .context("connecting to postgres")?;
        info!(max_connections, "connected to db");
        Ok(Self { pool })
    }

    /// Apply `NNNN_name.sql` files from `./migrations` that are not yet recorded
    /// in `_sqlx_migrations`, in version order.
    pub async fn run_migrations(&self) -> Result<()> {
        let dir = Path::new(MIGRATIONS_DIR);
        if !dir.exists() {
            warn!(dir = MIGRATIONS_DIR, "migrations directory missing; nothing applied");
            return Ok(());
        }
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _sqlx_migrations (
                version BIGINT PRIMARY KEY,
                description TEXT,
                installed_at TIMESTAMPTZ DEFAULT now()
             )",
        )
        .execute(&self.pool)
        .await?;

        let mut applied: HashSet<i64> = HashSet::new();
        for r in sqlx::raw_sql("SELECT version FROM _sqlx_migrations")
            .fetch_all(&self.pool)
            .await?
        {
            applied.insert(r.try_get::<i64, _>(0)?);
        }

        let mut candidates: Vec<(i64, String, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(fname) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some((version, desc)) = parse_migration_name(fname) {
                candidates.push((version, desc, path.clone()));
            }
        }
        candidates.sort_by_key(|(v, _, _)| *v);

        for (version, desc, path) in candidates {
            if !applied.insert(version) {
                continue;
            }
            let sql = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            info!(version, file = ?path, "applying migration");
            // a multi-statement simple query runs as one implicit transaction
            sqlx::raw_sql(&sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("migration {version} ({desc}) failed"))?;
            sqlx::query("INSERT INTO _sqlx_migrations(version, description) VALUES ($1, $2)")
                .persistent(false)
                .bind(version)
                .bind(&desc)
                .execute(&self.pool)
                .await?;
        }
        info!("migrations up-to-date");
        Ok(())
    }
}

/// `0001_nhl_schema.sql` -> `(1, "nhl_schema")`; anything else is ignored.
fn parse_migration_name(fname: &str) -> Option<(i64, String)> {
    let stem = fname.strip_suffix(".sql")?;
    let digits: String = stem.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let desc = stem[digits.len()..].strip_prefix('_')?;
    Some((digits.parse().ok()?, desc.to_string()))
}

/// `ON CONFLICT` tail overwriting every non-key column and stamping `last_updated`.
pub(crate) fn conflict_clause(columns: &[&str], keys: &[&str]) -> String {
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !keys.contains(c))
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .chain(std::iter::once("last_updated = now()".to_string()))
        .collect();
    format!(
        " ON CONFLICT ({}) DO UPDATE SET {}",
        keys.join(", "),
        updates.join(", ")
    )
}

fn rows_per_statement(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).max(1)
}

fn is_undefined_table_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("42P01"),
        _ => false,
    }
}

#[async_trait]
impl Storage for Db {
    #[instrument(skip(self, batch), fields(table = batch.table, rows = batch.len()))]
    async fn upsert(&self, batch: &UpsertBatch) -> Result<u64> {
        batch.validate()?;
        if batch.is_empty() {
            return Ok(0);
        }
        let head = format!("INSERT INTO {} ({}) ", batch.table, batch.columns.join(", "));
        let tail = conflict_clause(batch.columns, batch.key_fields);

        let mut tx = self.pool.begin().await?;
        let mut affected = 0u64;
        for chunk in batch.rows.chunks(rows_per_statement(batch.columns.len())) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(&head);
            qb.push_values(chunk, |mut b, row| {
                for value in row {
                    match value {
                        SqlValue::Int(v) => b.push_bind(*v),
                        SqlValue::Float(v) => b.push_bind(*v),
                        SqlValue::Text(v) => b.push_bind(v.clone()),
                        SqlValue::Bool(v) => b.push_bind(*v),
                        SqlValue::Timestamp(v) => b.push_bind(*v),
                        SqlValue::Date(v) => b.push_bind(*v),
                    };
                }
            });
            qb.push(&tail);
            let res = qb
                .build()
                .persistent(false)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("upserting into {}", batch.table))?;
            affected += res.rows_affected();
        }
        // dropping the transaction on an earlier `?` rolls every chunk back
        tx.commit().await?;
        Ok(affected)
    }

    #[instrument(skip(self, season), fields(season = %season))]
    async fn completed_game_ids(&self, season: &Season) -> Result<Vec<i64>> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM games WHERE season = $1 AND status = ANY($2)")
                .persistent(false)
                .bind(season.to_string())
                .bind(COMPLETED_STATUSES)
                .fetch_all(&self.pool)
                .await
                .context("selecting completed games")?;
        Ok(ids)
    }

    async fn team_codes(&self) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT abbreviation, id FROM teams WHERE abbreviation <> ''")
                .persistent(false)
                .fetch_all(&self.pool)
                .await
                .context("loading team codes")?;
        Ok(rows)
    }

    async fn table_summaries(&self) -> Result<Vec<TableSummary>> {
        let mut out = Vec::with_capacity(TABLES.len());
        for table in TABLES {
            let sql = format!("SELECT COUNT(*)::BIGINT, MAX(last_updated) FROM {table}");
            let (rows, last_updated) = match sqlx::query_as::<_, (i64, Option<DateTime<Utc>>)>(&sql)
                .persistent(false)
                .fetch_one(&self.pool)
                .await
            {
                Ok(r) => r,
                Err(e) if is_undefined_table_error(&e) => (0, None),
                Err(e) => return Err(e.into()),
            };
            out.push(TableSummary {
                table: table.to_string(),
                rows,
                last_updated,
            });
        }
        Ok(out)
    }

    async fn init_schema(&self) -> Result<()> {
        self.run_migrations().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::records::{PlayerStat, Record, Team};

    fn assert_send<T: Send>(_: &T) {}

    // `Storage` futures cross threads inside the runner and the API server.
    #[allow(dead_code)]
    fn storage_futures_are_send(db: &Db, batch: &UpsertBatch, season: &Season) {
        assert_send(&db.run_migrations());
        assert_send(&db.init_schema());
        assert_send(&db.upsert(batch));
        assert_send(&db.completed_game_ids(season));
    }

    #[test]
    fn migration_runner_is_send() {
        let check: fn(&Db, &UpsertBatch, &Season) = storage_futures_are_send;
        let _ = check;
    }

    #[test]
    fn conflict_clause_updates_only_non_key_columns() {
        let clause = conflict_clause(
            &["player_id", "game_id", "goals", "time_on_ice"],
            &["player_id", "game_id"],
        );
        assert_eq!(
            clause,
            " ON CONFLICT (player_id, game_id) DO UPDATE SET goals = EXCLUDED.goals, \
             time_on_ice = EXCLUDED.time_on_ice, last_updated = now()"
        );
    }

    #[test]
    fn conflict_clause_for_record_tables() {
        let clause = conflict_clause(Team::COLUMNS, Team::KEY_FIELDS);
        assert!(clause.starts_with(" ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name"));
        assert!(!clause.contains("id = EXCLUDED.id"));
        let clause = conflict_clause(PlayerStat::COLUMNS, PlayerStat::KEY_FIELDS);
        assert!(clause.contains("team_id = EXCLUDED.team_id"));
    }

    #[test]
    fn chunks_stay_under_the_bind_limit() {
        let per = rows_per_statement(Team::COLUMNS.len());
        assert!(per * Team::COLUMNS.len() <= MAX_BIND_PARAMS);
        assert_eq!(rows_per_statement(0), MAX_BIND_PARAMS);
    }

    #[test]
    fn migration_file_names() {
        assert_eq!(
            parse_migration_name("0001_nhl_schema.sql"),
            Some((1, "nhl_schema".to_string()))
        );
        assert_eq!(parse_migration_name("database_settings.sql"), None);
        assert_eq!(parse_migration_name("0002.sql"), None);
        assert_eq!(parse_migration_name("0003_notes.txt"), None);
    }
}
