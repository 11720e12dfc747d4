use std::fmt;
use std::future::Future;
use std::str::FromStr;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::error::ValidationError;

/// First season covered by an all-seasons backfill unless overridden.
pub const DEFAULT_BACKFILL_START_YEAR: i32 = 2010;

/// League season identified by its start year; renders as the 8-digit
/// `start`+`end` string used by the remote API and the `games.season` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Season {
    start_year: i32,
}

impl Season {
    pub fn starting(start_year: i32) -> Self {
        Self { start_year }
    }

    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    pub fn end_year(&self) -> i32 {
        self.start_year + 1
    }

    /// Season ending in `year`, i.e. `(year-1)(year)`.
    pub fn ending(year: i32) -> Self {
        Self::starting(year - 1)
    }

    pub fn current() -> Self {
        Self::ending(Utc::now().year())
    }

    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let s = raw.trim();
        let invalid = || ValidationError::InvalidSeason(raw.to_string());
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let start: i32 = s[..4].parse().map_err(|_| invalid())?;
        let end: i32 = s[4..].parse().map_err(|_| invalid())?;
        if end != start + 1 {
            return Err(invalid());
        }
        Ok(Self::starting(start))
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:04}", self.start_year, self.end_year())
    }
}

impl FromStr for Season {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Season::parse(s)
    }
}

impl Serialize for Season {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Season {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Season::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Seasons from `start_year` up to the season ending in `current_year`, ascending.
pub fn seasons_between(start_year: i32, current_year: i32) -> Vec<Season> {
    (start_year..current_year).map(Season::starting).collect()
}

/// All seasons from `start_year` through the current one.
pub fn backfill_seasons(start_year: i32) -> Vec<Season> {
    seasons_between(start_year, Utc::now().year())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillOutcome {
    pub completed: Vec<Season>,
    pub cancelled: bool,
}

/// Run `op` once per season in order. The token is polled between seasons only,
/// so a season already in flight always finishes.
#[instrument(skip(seasons, token, op), fields(seasons = seasons.len()))]
pub async fn for_each_season<F, Fut>(
    seasons: &[Season],
    token: &CancellationToken,
    mut op: F,
) -> BackfillOutcome
where
    F: FnMut(Season) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut outcome = BackfillOutcome::default();
    for season in seasons {
        if token.is_cancelled() {
            info!(next = %season, done = outcome.completed.len(), "backfill cancelled");
            outcome.cancelled = true;
            break;
        }
        op(*season).await;
        outcome.completed.push(*season);
    }
    outcome
}
