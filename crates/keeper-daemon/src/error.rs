//! Error taxonomy of a backup run
//!
//! Each variant maps to one failure class of the pipeline. Only
//! enumeration, packaging and upload failures end a run early; a dump
//! failure stays local to its data set and notification failures are
//! logged and dropped.

use keeper_common::KeeperError;
use thiserror::Error;

use crate::notify::NotifyError;
use crate::storage::StorageError;

/// Result type alias for pipeline operations
pub type BackupResult<T> = std::result::Result<T, BackupError>;

#[derive(Error, Debug)]
pub enum BackupError {
    /// The data source could not be reached at startup
    #[error("failed to connect to data source: {0}")]
    Connectivity(#[source] KeeperError),

    #[error("failed to list collections: {0}")]
    Enumeration(#[source] KeeperError),

    #[error("failed to dump collection {data_set}: {source}")]
    DataSetDump {
        data_set: String,
        #[source]
        source: KeeperError,
    },

    #[error("failed to package archive: {0}")]
    Packaging(String),

    #[error("failed to upload archive: {0}")]
    Upload(#[from] StorageError),

    #[error("failed to deliver notification: {0}")]
    Notification(#[from] NotifyError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BackupError {
    pub fn packaging(err: impl std::fmt::Display) -> Self {
        BackupError::Packaging(err.to_string())
    }
}
