//! Environment-driven configuration, resolved once at startup

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::IstError;

pub const DEFAULT_DATA_PATH: &str = "ist-events.json";
pub const DEFAULT_MODEL_VERSION: &str = "ist-v1";

/// Which event store backend serves this process
#[derive(Debug, Clone, PartialEq)]
pub enum StorageMode {
    /// JSON file backed store; `None` keeps events in memory only
    Local { path: Option<PathBuf> },
    /// PostgreSQL backed store
    Relational {
        database_url: String,
        max_connections: u32,
    },
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::Local { path: Some(path) } => write!(f, "JSON file {}", path.display()),
            StorageMode::Local { path: None } => write!(f, "in-memory"),
            StorageMode::Relational {
                max_connections, ..
            } => write!(f, "PostgreSQL (pool of {max_connections})"),
        }
    }
}

/// Backend names recognized by `IST_STORAGE_MODE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Relational,
}

impl FromStr for BackendKind {
    type Err = IstError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "local" | "json" => Ok(BackendKind::Local),
            "relational" | "postgres" => Ok(BackendKind::Relational),
            other => Err(IstError::Configuration(format!(
                "unknown IST_STORAGE_MODE: {other}. Use 'local' or 'relational'."
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub storage: StorageMode,
    pub classifier_timeout: Duration,
    pub model_version: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, IstError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IstError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset.
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let kind = match lookup("IST_STORAGE_MODE") {
            Some(value) => value.parse()?,
            None => BackendKind::Local,
        };

        let storage = match kind {
            BackendKind::Local => StorageMode::Local {
                path: Some(
                    lookup("IST_DATA_PATH")
                        .map(PathBuf::from)
                        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_PATH)),
                ),
            },
            BackendKind::Relational => StorageMode::Relational {
                database_url: lookup("DATABASE_URL").ok_or_else(|| {
                    IstError::Configuration(
                        "DATABASE_URL must be set when IST_STORAGE_MODE is relational".into(),
                    )
                })?,
                max_connections: parse_number(&lookup, "IST_DB_MAX_CONNECTIONS", 5)?,
            },
        };

        let timeout_secs: u64 = parse_number(&lookup, "IST_CLASSIFIER_TIMEOUT_SECS", 30)?;

        Ok(Self {
            storage,
            classifier_timeout: Duration::from_secs(timeout_secs),
            model_version: lookup("IST_MODEL_VERSION")
                .unwrap_or_else(|| DEFAULT_MODEL_VERSION.to_string()),
        })
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, IstError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| IstError::Configuration(format!("{key} is not a valid number: {raw}"))),
    }
}
