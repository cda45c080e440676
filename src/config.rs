//! Beat configuration loaded from environment variables and a queries file

use crate::beat_core::runner::QuerySpec;
use crate::beat_core::translator::RowTranslator;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_QUERIES_FILE: &str = "queries.json";
pub const DEFAULT_PERIOD_MS: u64 = 10_000;
pub const DEFAULT_DELTA_WILDCARD: &str = "__DELTA";
pub const DEFAULT_DELTA_KEY_WILDCARD: &str = "__DELTAKEY";
pub const DEFAULT_RESUME_FILE: &str = "resume-multiple-rows.db";
pub const DEFAULT_OUTPUT_PATH: &str = "events/querybeat.jsonl";

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
    QueriesFile { path: PathBuf, source: std::io::Error },
    QueriesFormat(serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
            ConfigError::QueriesFile { path, source } => {
                write!(f, "Cannot read queries file {}: {}", path.display(), source)
            }
            ConfigError::QueriesFormat(e) => write!(f, "Invalid queries file: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::QueriesFormat(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkType {
    Jsonl,
    Stdout,
}

impl SinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkType::Jsonl => "jsonl",
            SinkType::Stdout => "stdout",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "jsonl" => Some(SinkType::Jsonl),
            "stdout" => Some(SinkType::Stdout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BeatConfig {
    pub db_path: PathBuf,
    pub queries_file: PathBuf,
    pub queries: Vec<QuerySpec>,
    pub period: Duration,
    pub delta_wildcard: String,
    pub delta_key_wildcard: String,
    pub resume_file: PathBuf,
    pub sink: SinkType,
    pub output_path: PathBuf,
    pub output_max_size_mb: u64,
    pub output_max_rotations: u32,
}

impl BeatConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// Missing optional variables fall back to their defaults; present but
    /// unparseable values are rejected. The result is validated.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("QUERYBEAT_DB_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::MissingVariable("QUERYBEAT_DB_PATH".to_string()))?;

        let queries_file = PathBuf::from(string_or(&lookup, "QUERYBEAT_QUERIES_FILE", DEFAULT_QUERIES_FILE));
        let queries = Self::load_queries(&queries_file)?;

        let period_ms: u64 = parse_or(&lookup, "QUERYBEAT_PERIOD_MS", DEFAULT_PERIOD_MS)?;
        let delta_wildcard = string_or(&lookup, "QUERYBEAT_DELTA_WILDCARD", DEFAULT_DELTA_WILDCARD);
        let delta_key_wildcard = string_or(&lookup, "QUERYBEAT_DELTA_KEY_WILDCARD", DEFAULT_DELTA_KEY_WILDCARD);
        let resume_file = PathBuf::from(string_or(&lookup, "QUERYBEAT_RESUME_FILE", DEFAULT_RESUME_FILE));

        let sink_str = string_or(&lookup, "QUERYBEAT_SINK", SinkType::Jsonl.as_str());
        let sink = SinkType::from_str(&sink_str).ok_or_else(|| {
            ConfigError::InvalidValue(format!("QUERYBEAT_SINK must be jsonl or stdout, got '{}'", sink_str))
        })?;

        let output_path = PathBuf::from(string_or(&lookup, "QUERYBEAT_OUTPUT_PATH", DEFAULT_OUTPUT_PATH));
        let output_max_size_mb = parse_or(&lookup, "OUTPUT_MAX_SIZE_MB", 100u64)?;
        let output_max_rotations = parse_or(&lookup, "OUTPUT_MAX_ROTATIONS", 10u32)?;

        let config = Self {
            db_path,
            queries_file,
            queries,
            period: Duration::from_millis(period_ms),
            delta_wildcard,
            delta_key_wildcard,
            resume_file,
            sink,
            output_path,
            output_max_size_mb,
            output_max_rotations,
        };

        config.validate()?;
        Ok(config)
    }

    /// Read a JSON array of `{"query", "type"}` objects
    pub fn load_queries(path: &Path) -> Result<Vec<QuerySpec>, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::QueriesFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_queries(&contents)
    }

    pub fn parse_queries(json: &str) -> Result<Vec<QuerySpec>, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queries.is_empty() {
            return Err(ConfigError::InvalidValue("at least one query is required".to_string()));
        }

        for (i, spec) in self.queries.iter().enumerate() {
            validate_query(i, &spec.query)?;
        }

        if self.period.is_zero() {
            return Err(ConfigError::InvalidValue(
                "QUERYBEAT_PERIOD_MS must be greater than 0".to_string(),
            ));
        }

        if self.delta_wildcard.is_empty() || self.delta_key_wildcard.is_empty() {
            return Err(ConfigError::InvalidValue("delta wildcards cannot be empty".to_string()));
        }

        if self.delta_wildcard == self.delta_key_wildcard {
            return Err(ConfigError::InvalidValue(format!(
                "delta wildcard and delta key wildcard must differ (both '{}')",
                self.delta_wildcard
            )));
        }

        Ok(())
    }

    pub fn translator(&self) -> RowTranslator {
        RowTranslator::new(self.delta_wildcard.clone(), self.delta_key_wildcard.clone())
    }

    pub fn log_summary(&self) {
        log::info!("⚙️  Configuration:");
        log::info!("   ├─ Database: {}", self.db_path.display());
        log::info!("   ├─ Period: {:?}", self.period);
        log::info!("   ├─ Delta wildcard: {}", self.delta_wildcard);
        log::info!("   ├─ Delta key wildcard: {}", self.delta_key_wildcard);
        log::info!("   ├─ Resume file: {}", self.resume_file.display());
        match self.sink {
            SinkType::Jsonl => log::info!(
                "   ├─ Sink: jsonl → {} ({} MB x {} rotations)",
                self.output_path.display(),
                self.output_max_size_mb,
                self.output_max_rotations
            ),
            SinkType::Stdout => log::info!("   ├─ Sink: stdout"),
        }
        log::info!("   └─ Queries: {} (from {})", self.queries.len(), self.queries_file.display());

        for (i, spec) in self.queries.iter().enumerate() {
            log::info!("Query #{} (type: {}): {}", i + 1, spec.query_type.as_str(), spec.query);
        }
    }
}

fn validate_query(index: usize, query: &str) -> Result<(), ConfigError> {
    let normalized = query.trim().to_uppercase();

    if !normalized.starts_with("SELECT") && !normalized.starts_with("SHOW") {
        return Err(ConfigError::InvalidValue(format!(
            "query #{} must start with SELECT or SHOW",
            index + 1
        )));
    }

    if normalized.contains(';') {
        return Err(ConfigError::InvalidValue(format!(
            "query #{} must not contain ';'",
            index + 1
        )));
    }

    Ok(())
}

fn string_or<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).filter(|s| !s.is_empty()) {
        Some(value) => value,
        None => {
            log::info!("{} not set, using default: {}", key, default);
            default.to_string()
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Display,
{
    match lookup(key).filter(|s| !s.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(format!("{} has invalid value '{}'", key, value))),
        None => {
            log::info!("{} not set, using default: {}", key, default);
            Ok(default)
        }
    }
}
