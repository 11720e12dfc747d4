use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::database_ops::backfill::DEFAULT_BACKFILL_START_YEAR;
use crate::database_ops::sync_engine::EntityKind;
use crate::error::ValidationError;
use crate::util::env::{env_flag, env_opt, env_parse};

pub const DEFAULT_API_BASE_URL: &str = "https://api-web.nhle.com/v1";
pub const MIN_REFRESH_SECS: u64 = 60;

/// How a full season's schedule is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    /// Walk every week page of the season window.
    #[default]
    Weekly,
    /// Fetch each club's season schedule and de-duplicate.
    Club,
}

impl FromStr for ScheduleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weekly" | "week" => Ok(Self::Weekly),
            "club" | "team" => Ok(Self::Club),
            other => Err(format!("unknown schedule mode '{other}'")),
        }
    }
}

impl fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleMode::Weekly => f.write_str("weekly"),
            ScheduleMode::Club => f.write_str("club"),
        }
    }
}

/// Daemon period per entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshIntervals {
    pub teams: Duration,
    pub players: Duration,
    pub games: Duration,
    pub stats: Duration,
}

impl Default for RefreshIntervals {
    fn default() -> Self {
        Self {
            teams: Duration::from_secs(86_400),
            players: Duration::from_secs(86_400),
            games: Duration::from_secs(3_600),
            stats: Duration::from_secs(3_600),
        }
    }
}

impl RefreshIntervals {
    pub fn for_kind(&self, kind: EntityKind) -> Duration {
        match kind {
            EntityKind::Teams => self.teams,
            EntityKind::Players => self.players,
            EntityKind::Games => self.games,
            EntityKind::Stats => self.stats,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for kind in EntityKind::ALL {
            let secs = self.for_kind(kind).as_secs();
            if secs < MIN_REFRESH_SECS {
                return Err(ValidationError::IntervalTooShort {
                    name: kind.as_str(),
                    secs,
                });
            }
        }
        Ok(())
    }

    fn from_env() -> Self {
        let d = Self::default();
        let secs = |key: &str, fallback: Duration| {
            Duration::from_secs(env_parse(key, fallback.as_secs()))
        };
        Self {
            teams: secs("REFRESH_TEAMS_SECS", d.teams),
            players: secs("REFRESH_PLAYERS_SECS", d.players),
            games: secs("REFRESH_GAMES_SECS", d.games),
            stats: secs("REFRESH_STATS_SECS", d.stats),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub api_timeout: Duration,
    pub refresh: RefreshIntervals,
    pub fallback_teams: bool,
    pub backfill_start_year: i32,
    pub schedule_mode: ScheduleMode,
    pub db_max_conns: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_timeout: Duration::from_secs(30),
            refresh: RefreshIntervals::default(),
            fallback_teams: true,
            backfill_start_year: DEFAULT_BACKFILL_START_YEAR,
            schedule_mode: ScheduleMode::Weekly,
            db_max_conns: 5,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ValidationError> {
        let d = Self::default();
        let schedule_mode = match env_opt("NHL_SCHEDULE_MODE") {
            Some(raw) => raw.parse().unwrap_or_else(|e: String| {
                tracing::warn!(error = %e, "falling back to weekly schedule mode");
                ScheduleMode::Weekly
            }),
            None => d.schedule_mode,
        };
        let cfg = Self {
            api_base_url: env_opt("NHL_API_BASE_URL")
                .map(|u| u.trim().trim_end_matches('/').to_string())
                .unwrap_or(d.api_base_url),
            api_timeout: Duration::from_secs(env_parse("NHL_API_TIMEOUT_SECS", 30u64).max(1)),
            refresh: RefreshIntervals::from_env(),
            fallback_teams: env_flag("NHL_FALLBACK_TEAMS", d.fallback_teams),
            backfill_start_year: env_parse("BACKFILL_START_YEAR", d.backfill_start_year),
            schedule_mode,
            db_max_conns: env_parse("DB_MAX_CONNS", d.db_max_conns),
        };
        cfg.refresh.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_intervals_pass_validation() {
        let r = RefreshIntervals::default();
        assert_eq!(r.for_kind(EntityKind::Teams), Duration::from_secs(86_400));
        assert_eq!(r.for_kind(EntityKind::Stats), Duration::from_secs(3_600));
        assert!(r.validate().is_ok());
    }

    #[test]
    fn intervals_below_a_minute_are_rejected() {
        let r = RefreshIntervals {
            games: Duration::from_secs(59),
            ..RefreshIntervals::default()
        };
        assert_eq!(
            r.validate(),
            Err(ValidationError::IntervalTooShort {
                name: "games",
                secs: 59
            })
        );
    }

    #[test]
    fn schedule_mode_parsing() {
        assert_eq!("Weekly".parse::<ScheduleMode>(), Ok(ScheduleMode::Weekly));
        assert_eq!("club".parse::<ScheduleMode>(), Ok(ScheduleMode::Club));
        assert!("sampled".parse::<ScheduleMode>().is_err());
    }
}
