use thiserror::Error;

/// Rejections raised before any fetch begins.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid season '{0}': expected 8 digits, start year followed by start year + 1 (e.g. 20222023)")]
    InvalidSeason(String),
    #[error("unknown sync target '{0}': expected one of teams, players, games, stats, all")]
    UnknownTarget(String),
    #[error("refresh interval for {name} is {secs}s; minimum is 60s")]
    IntervalTooShort { name: &'static str, secs: u64 },
}

/// Control-surface failures for the sync runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("a sync session is already running")]
    Busy,
    #[error("daemon scheduling is already active")]
    DaemonActive,
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}
