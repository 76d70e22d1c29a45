use std::path::PathBuf;

use tokio::sync::Semaphore;

use crate::hours::OperatingHours;

/// Process configuration, read once from `STUDYSPOT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Always within `1..=Semaphore::MAX_PERMITS`.
    pub max_connections: usize,
    /// WAL appends before an inline compaction; 0 disables it.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub hours: OperatingHours,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidHours { open: String, close: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidHours { open, close } => write!(
                f,
                "invalid operating hours {open:?}-{close:?}: expected HH:MM with open before close"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5000,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            hours: OperatingHours::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable numbers fall back to
    /// defaults; bad operating hours are an error.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let open = get("STUDYSPOT_OPEN_TIME").unwrap_or_else(|| "08:00".into());
        let close = get("STUDYSPOT_CLOSE_TIME").unwrap_or_else(|| "22:00".into());
        let hours = OperatingHours::parse(&open, &close)
            .ok_or(ConfigError::InvalidHours { open, close })?;

        Ok(Self {
            bind: get("STUDYSPOT_BIND").unwrap_or(defaults.bind),
            port: parsed(get("STUDYSPOT_PORT")).unwrap_or(defaults.port),
            data_dir: get("STUDYSPOT_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            max_connections: parsed(get("STUDYSPOT_MAX_CONNECTIONS"))
                .unwrap_or(defaults.max_connections)
                .clamp(1, Semaphore::MAX_PERMITS),
            compact_threshold: parsed(get("STUDYSPOT_COMPACT_THRESHOLD"))
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(get("STUDYSPOT_METRICS_PORT")),
            hours,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("studyspot.wal")
    }
}

fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|s| s.trim().parse().ok())
}
