//! Error taxonomy for analysis, storage and configuration

use thiserror::Error;

/// Errors surfaced by the analysis and reporting surfaces
#[derive(Error, Debug)]
pub enum IstError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Failures reported by an event store backend
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed event data: {0}")]
    Malformed(String),

    #[error("database failure: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("backend not reachable: {0}")]
    Unavailable(String),

    #[error("an event with id {0} already exists")]
    DuplicateId(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Malformed(err.to_string())
    }
}

/// Failures reported by a classifier
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("model overloaded: {0}")]
    Overloaded(String),

    #[error("classifier timed out after {0} ms")]
    TimedOut(u64),

    #[error("classification failed: {0}")]
    Failed(String),

    #[error("classifier returned invalid output: {0}")]
    InvalidOutput(String),
}

impl ClassifierError {
    /// Transient failures are recovered with a fallback record
    pub fn is_transient(&self) -> bool {
        matches!(self, ClassifierError::Overloaded(_) | ClassifierError::TimedOut(_))
    }
}
