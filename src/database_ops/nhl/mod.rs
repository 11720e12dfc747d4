pub mod provider;
pub mod seed;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::backfill::Season;

pub use provider::NhlApiClient;

/// Remote source of league documents. Every transport or decode failure comes
/// back as `Err`; the sync engine decides whether that empties a fetch or skips
/// one item.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Team documents, one per franchise.
    async fn fetch_teams(&self) -> Result<Vec<Value>>;

    /// Roster entries of one team, flattened across position groups.
    async fn fetch_roster(&self, team_id: i64) -> Result<Vec<Value>>;

    async fn fetch_player(&self, player_id: i64) -> Result<Value>;

    /// Date groups `{date, games: [..]}`. With a team the club schedule is
    /// used; with only a season the whole league season; with neither, the
    /// current week.
    async fn fetch_schedule(
        &self,
        season: Option<&Season>,
        team_id: Option<i64>,
    ) -> Result<Vec<Value>>;

    async fn fetch_box_score(&self, game_id: i64) -> Result<Value>;
}
