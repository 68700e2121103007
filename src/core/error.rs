use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SortpipeError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("Failed to initialize database: {0}")]
    DatabaseInitializationError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Inconsistent reference electrodes in group {group}: {detail}")]
    InconsistentReferenceError { group: String, detail: String },
    #[error("Invalid sort interval '{interval}': {detail}")]
    InvalidIntervalError { interval: String, detail: String },
    #[error("Sorter '{sorter}' failed: {detail}")]
    SorterExecutionError { sorter: String, detail: String },
    #[error("Unknown quality metric '{0}' is not in the metric catalog")]
    UnknownMetricError(String),
    #[error("Team '{0}' has no resolvable members; denying by default")]
    NoTeamMembersError(String),
    #[error("Permission denied: {0}")]
    PermissionDeniedError(String),
}
