use std::fmt::Write as _;

use anyhow::{Context, Result};

use crate::database_ops::backfill::Season;
use crate::database_ops::storage::{Storage, TableSummary};

#[derive(Debug, Clone, Default)]
pub struct DbCountsConfig {
    /// Also report how many completed games the season holds.
    pub season: Option<Season>,
}

/// Render the per-table summary block printed by `--counts`.
pub fn render(summaries: &[TableSummary]) -> String {
    let mut out = String::new();
    writeln!(out, "DB COUNTS SUMMARY:").ok();
    let width = summaries.iter().map(|s| s.table.len()).max().unwrap_or(0);
    for s in summaries {
        let updated = s
            .last_updated
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        writeln!(
            out,
            "  {:<width$}  {:>10}  last updated {}",
            s.table,
            s.rows,
            updated,
            width = width
        )
        .ok();
    }
    out
}

pub async fn run(storage: &dyn Storage, cfg: DbCountsConfig) -> Result<String> {
    let summaries = storage
        .table_summaries()
        .await
        .context("reading table summaries")?;
    let mut out = render(&summaries);
    if let Some(season) = cfg.season {
        let completed = storage
            .completed_game_ids(&season)
            .await
            .context("counting completed games")?;
        writeln!(out, "  completed games in {season}: {}", completed.len()).ok();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::records::Game;
    use crate::database_ops::storage::{MemoryStore, UpsertBatch};

    #[tokio::test]
    async fn lists_every_table_and_season_completion() {
        let store = MemoryStore::new();
        let game = Game {
            id: 2022020001,
            season: "20222023".into(),
            game_type: "2".into(),
            date_time: None,
            away_team_id: 28,
            home_team_id: 18,
            venue: None,
            status: "OFF".into(),
            away_score: 1,
            home_score: 4,
        };
        store
            .upsert(&UpsertBatch::from_records(&[game]))
            .await
            .unwrap();

        let out = run(
            &store,
            DbCountsConfig {
                season: Some(Season::starting(2022)),
            },
        )
        .await
        .unwrap();
        assert!(out.starts_with("DB COUNTS SUMMARY:"));
        assert!(out.contains("goalie_stats"));
        assert!(out.contains("never"));
        assert!(out.contains("completed games in 20222023: 1"));
    }
}
