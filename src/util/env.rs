//! Environment helpers: dotenv loading, typed getters, database URL resolution.
//! Call `init_env()` once early in each binary (every getter also calls it).
use std::str::FromStr;
use std::sync::Once;
use tracing::info;

static INIT: Once = Once::new();

/// Load `.env` exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        let _ = dotenv::dotenv();
    });
}

/// Required env var; error if missing or blank.
pub fn env_req(key: &str) -> anyhow::Result<String> {
    env_opt(key).ok_or_else(|| anyhow::anyhow!("missing env var {key}"))
}

/// Optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Parsed value with default fallback; unparsable values fall back too.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_opt(key)
        .and_then(|raw| raw.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Boolean flag; accepts 1/true/on/yes (case-insensitive) as true.
pub fn env_flag(key: &str, default: bool) -> bool {
    match env_opt(key) {
        Some(raw) => parse_flag(&raw),
        None => default,
    }
}

fn parse_flag(raw: &str) -> bool {
    let v = raw.trim().to_ascii_lowercase();
    matches!(v.as_str(), "1" | "true" | "on" | "yes")
}

/// Parts of a Postgres DSN taken from `DB_*` variables.
#[derive(Debug, Clone, Default)]
pub struct DbParts {
    pub host: String,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    pub port: u16,
    pub ssl_mode: Option<String>,
}

impl DbParts {
    fn from_env() -> Option<Self> {
        Some(Self {
            host: env_opt("DB_HOST")?,
            user: env_opt("DB_USER")?,
            password: env_opt("DB_PASSWORD"),
            database: env_opt("DB_NAME").unwrap_or_else(|| "nhl_data".into()),
            port: env_parse("DB_PORT", 5432u16),
            ssl_mode: env_opt("DB_SSLMODE"),
        })
    }

    /// Render through `url::Url` so reserved characters in credentials are
    /// percent-encoded.
    pub fn to_url(&self) -> Option<String> {
        let mut out = url::Url::parse("postgresql://localhost").ok()?;
        out.set_username(&self.user).ok()?;
        if let Some(pass) = &self.password {
            out.set_password(Some(pass)).ok()?;
        }
        let host = self.host.trim().trim_matches(|c| c == '[' || c == ']');
        if host.contains(':') {
            out.set_host(Some(&format!("[{host}]"))).ok()?;
        } else {
            out.set_host(Some(host)).ok()?;
        }
        out.set_port(Some(self.port)).ok()?;
        out.set_path(&format!("/{}", self.database));
        if let Some(mode) = self.ssl_mode.as_deref().filter(|m| *m != "disable") {
            out.query_pairs_mut().append_pair("sslmode", mode);
        }
        Some(out.to_string())
    }
}

/// `DATABASE_URL` when set, otherwise a DSN composed from `DB_HOST`, `DB_USER`,
/// `DB_PASSWORD`, `DB_NAME`, `DB_PORT` and `DB_SSLMODE`.
pub fn db_url() -> anyhow::Result<String> {
    if let Some(v) = env_opt("DATABASE_URL") {
        return Ok(v);
    }
    if let Some(dsn) = DbParts::from_env().and_then(|p| p.to_url()) {
        info!(target = "env", "using DSN composed from DB_* variables");
        return Ok(dsn);
    }
    Err(anyhow::anyhow!(
        "no database configured; set DATABASE_URL or DB_HOST/DB_USER"
    ))
}

pub fn redact_value(key: &str, val: &str) -> String {
    let k = key.to_ascii_uppercase();
    if k.contains("PASSWORD") || k.contains("SECRET") || k.contains("TOKEN") {
        return "***".to_string();
    }
    let val_trim = val.trim();
    // DSNs are masked whatever the key is called.
    if let Ok(mut u) = url::Url::parse(val_trim) {
        let scheme = u.scheme().to_ascii_lowercase();
        if scheme == "postgres" || scheme == "postgresql" {
            let _ = u.set_username("***");
            let _ = u.set_password(Some("***"));
            return u.to_string();
        }
    }
    val_trim.to_string()
}

/// Validate required keys and log a redacted configuration snapshot.
pub fn preflight_check(title: &str, required: &[&str], also_log: &[&str]) -> anyhow::Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|k| env_opt(k).is_none())
        .collect();
    let snapshot: Vec<(String, String)> = also_log
        .iter()
        .map(|k| (k.to_string(), redact_value(k, &env_opt(k).unwrap_or_default())))
        .collect();
    info!(target = "preflight", title, snapshot = ?snapshot, "configuration snapshot");
    if !missing.is_empty() {
        return Err(anyhow::anyhow!("missing required env: {missing:?}"));
    }
    Ok(())
}
