//! Low-level error types shared by the pipeline stages

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, KeeperError>;

/// Failures that any stage can run into before they are classified
/// into a run outcome.
#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),
}

impl KeeperError {
    /// Wrap any displayable driver error as a database failure.
    pub fn database(err: impl std::fmt::Display) -> Self {
        KeeperError::Database(err.to_string())
    }
}
