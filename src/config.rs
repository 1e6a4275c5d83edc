//! Runtime configuration read from the process environment.
//! Defaults point at the public Open-Meteo and Nominatim endpoints and a
//! SQLite file under `db/`.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "db/weather.db";
pub const DEFAULT_ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";
pub const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org/search";
pub const DEFAULT_TIMEZONE_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_PARALLEL_FETCHES: usize = 4;
pub const DEFAULT_LOCATIONS: [&str; 6] = ["Lagos", "Middlesbrough", "London", "Leeds", "Paris", "Toulouse"];
/// The store records the UK under its older name.
pub const DEFAULT_REGION_ALIASES: &str = "United Kingdom=Great Britain";
/// Paris and Berlin observe the same offset; the store's region list uses Berlin.
pub const DEFAULT_TIMEZONE_ALIASES: &str = "Europe/Paris=Europe/Berlin";

/// Maps a name as reported by an external source to the name the store uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable(BTreeMap<String, String>);

impl AliasTable {
    pub fn new() -> Self {
        AliasTable(BTreeMap::new())
    }

    /// Parse `alias=canonical` pairs separated by `;`. Blank entries are ignored.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut table = AliasTable::new();
        for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (alias, canonical) = entry
                .split_once('=')
                .ok_or_else(|| format!("alias entry `{}` is missing '='", entry))?;
            let (alias, canonical) = (alias.trim(), canonical.trim());
            if alias.is_empty() || canonical.is_empty() {
                return Err(format!("alias entry `{}` has an empty side", entry));
            }
            table.insert(alias, canonical);
        }
        Ok(table)
    }

    pub fn insert(&mut self, alias: impl Into<String>, canonical: impl Into<String>) {
        self.0.insert(alias.into(), canonical.into());
    }

    /// The canonical name for `name`, or `name` itself when it is not an alias.
    pub fn canonical<'a>(&'a self, name: &'a str) -> &'a str {
        self.0.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub archive_url: String,
    pub geocoder_url: String,
    pub timezone_url: String,
    /// Nominatim's usage policy requires an identifying User-Agent.
    pub user_agent: String,
    /// Applies to every external request; expiry surfaces as a fetch timeout.
    pub http_timeout: Duration,
    /// Upper bound on locations processed at once.
    pub max_parallel_fetches: NonZeroUsize,
    /// Locations synced when none are given on the command line.
    pub locations: Vec<String>,
    pub region_aliases: AliasTable,
    pub timezone_aliases: AliasTable,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let http_timeout_secs = match get("HTTP_TIMEOUT_SECS") {
            Some(s) => s
                .parse::<u64>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| "HTTP_TIMEOUT_SECS must be a positive integer".to_string())?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        let max_parallel_fetches = match get("MAX_PARALLEL_FETCHES") {
            Some(s) => s
                .parse::<NonZeroUsize>()
                .map_err(|_| "MAX_PARALLEL_FETCHES must be a positive integer".to_string())?,
            None => NonZeroUsize::new(DEFAULT_MAX_PARALLEL_FETCHES).unwrap_or(NonZeroUsize::MIN),
        };

        let locations = match get("LOCATIONS") {
            Some(s) => split_list(&s),
            None => DEFAULT_LOCATIONS.iter().map(|s| s.to_string()).collect(),
        };

        let region_aliases = AliasTable::parse(&get("REGION_ALIASES").unwrap_or_else(|| DEFAULT_REGION_ALIASES.into()))
            .map_err(|e| format!("REGION_ALIASES: {}", e))?;
        let timezone_aliases =
            AliasTable::parse(&get("TIMEZONE_ALIASES").unwrap_or_else(|| DEFAULT_TIMEZONE_ALIASES.into()))
                .map_err(|e| format!("TIMEZONE_ALIASES: {}", e))?;

        Ok(Config {
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            archive_url: get("ARCHIVE_URL").unwrap_or_else(|| DEFAULT_ARCHIVE_URL.to_string()),
            geocoder_url: get("GEOCODER_URL").unwrap_or_else(|| DEFAULT_GEOCODER_URL.to_string()),
            timezone_url: get("TIMEZONE_URL").unwrap_or_else(|| DEFAULT_TIMEZONE_URL.to_string()),
            user_agent: get("HTTP_USER_AGENT")
                .unwrap_or_else(|| format!("meteo-archive-sync/{}", env!("CARGO_PKG_VERSION"))),
            http_timeout: Duration::from_secs(http_timeout_secs),
            max_parallel_fetches,
            locations,
            region_aliases,
            timezone_aliases,
        })
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load `KEY=VALUE` lines from a dotenv-style file into the process
/// environment. Variables already set in the environment win.
pub fn load_env_file(path: &Path) -> Result<(), String> {
    let contents = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    for (index, line) in contents.lines().enumerate() {
        let parsed = parse_env_line(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?;
        if let Some((key, value)) = parsed
            && std::env::var_os(&key).is_none()
        {
            // Mutating the environment is unsafe once threads exist; this runs
            // during startup before any are spawned.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

/// Parse one dotenv line. Comments and blank lines yield `None`.
pub fn parse_env_line(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let assignment = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);
    let (key, raw_value) = assignment
        .split_once('=')
        .ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(format!("invalid variable name `{}`", key));
    }

    let raw_value = raw_value.trim();
    let value = match raw_value.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let inner = &raw_value[1..];
            let close = inner
                .find(quote)
                .ok_or_else(|| format!("unterminated {} quote", quote))?;
            let rest = inner[close + 1..].trim();
            if !rest.is_empty() && !rest.starts_with('#') {
                return Err("unexpected characters after closing quote".to_string());
            }
            inner[..close].to_string()
        }
        _ => raw_value.split(" #").next().unwrap_or_default().trim_end().to_string(),
    };
    Ok(Some((key.to_string(), value)))
}
