//! Error types for tuning-box

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Supplied level name diverges from the environment's hierarchy
    #[error("Unexpected level name '{actual}'. Expected '{expected}'.")]
    PathMismatch { expected: String, actual: String },

    #[error("Path has {got} levels but the environment hierarchy only has {max_depth}")]
    PathTooLong { max_depth: usize, got: usize },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Uniqueness conflict that re-querying could not resolve
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// True for errors caused by caller input (never retried, 4xx at a boundary)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StorageError::NotFound(_)
                | StorageError::PathMismatch { .. }
                | StorageError::PathTooLong { .. }
                | StorageError::Validation(_)
        )
    }
}
