//! Remote storage for packaged archives
//!
//! Backends implement [`RemoteStorage`] and consume a [`ChunkSource`], so an
//! archive on disk and a buffer in memory are uploaded the same way.
//! [`ChunkedUploader`] owns the local-file policy: an on-disk artifact is
//! deleted after a completed upload and kept after a failed one.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{info, instrument};

use crate::dump::remove_file_logged;

pub mod config;
pub mod gdrive;
pub mod s3;
pub mod token;

pub use config::{StorageBackend, StorageConfig};
pub use gdrive::GoogleDriveStorage;
pub use s3::S3Storage;
pub use token::{OAuthTokenProvider, StaticToken, TokenProvider};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("storage configuration error: {0}")]
    Config(String),
}

/// The output of a collection run, either still in memory or packaged on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    InMemory(Bytes),
    OnDisk(PathBuf),
}

impl Artifact {
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Artifact::InMemory(_) => None,
            Artifact::OnDisk(path) => Some(path),
        }
    }
}

enum ChunkInput {
    Memory(Bytes),
    File(tokio::fs::File),
}

/// Fixed-size chunks over an [`Artifact`], read sequentially
pub struct ChunkSource {
    input: ChunkInput,
    chunk_size: usize,
    total_len: u64,
    offset: u64,
}

impl ChunkSource {
    pub async fn from_artifact(artifact: &Artifact, chunk_size: usize) -> Result<Self, StorageError> {
        let chunk_size = chunk_size.max(1);
        let (input, total_len) = match artifact {
            Artifact::InMemory(bytes) => (ChunkInput::Memory(bytes.clone()), bytes.len() as u64),
            Artifact::OnDisk(path) => {
                let file = tokio::fs::File::open(path).await?;
                let len = file.metadata().await?.len();
                (ChunkInput::File(file), len)
            },
        };

        Ok(Self {
            input,
            chunk_size,
            total_len,
            offset: 0,
        })
    }

    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Bytes handed out so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Next chunk, `None` once the artifact is exhausted. Every chunk but the
    /// last is exactly `chunk_size` bytes.
    pub async fn next_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        let remaining = self.total_len.saturating_sub(self.offset);
        if remaining == 0 {
            return Ok(None);
        }
        let want = remaining.min(self.chunk_size as u64) as usize;

        let chunk = match &mut self.input {
            ChunkInput::Memory(bytes) => {
                let start = self.offset as usize;
                bytes.slice(start..start + want)
            },
            ChunkInput::File(file) => {
                let mut buf = BytesMut::zeroed(want);
                file.read_exact(&mut buf).await?;
                buf.freeze()
            },
        };

        self.offset += chunk.len() as u64;
        Ok(Some(chunk))
    }
}

/// A file created in remote storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub id: String,
    pub name: String,
    pub size: u64,
}

#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Short backend name used in logs
    fn kind(&self) -> &'static str;

    /// Create (or overwrite) `remote_name` under `folder` from `source`.
    async fn upload(
        &self,
        remote_name: &str,
        folder: &str,
        source: &mut ChunkSource,
    ) -> Result<RemoteObject, StorageError>;
}

pub struct ChunkedUploader {
    storage: Arc<dyn RemoteStorage>,
    folder: String,
    chunk_size: usize,
}

impl ChunkedUploader {
    pub fn new(storage: Arc<dyn RemoteStorage>, folder: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            storage,
            folder: folder.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Build the configured backend.
    pub async fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let chunk_size = config.chunk_size_bytes();

        match config.backend {
            StorageBackend::GoogleDrive => {
                let credentials = config.gdrive.credentials_file.as_deref().ok_or_else(|| {
                    StorageError::Config("GOOGLE_DRIVE_CREDENTIALS_FILE is not set".to_string())
                })?;
                let tokens = OAuthTokenProvider::from_files(credentials, &config.gdrive.token_file)?;
                let storage = GoogleDriveStorage::new(Arc::new(tokens))?;
                Ok(Self::new(Arc::new(storage), config.gdrive.folder_id.clone(), chunk_size))
            },
            StorageBackend::S3 => {
                let storage = S3Storage::new(&config.s3).await?;
                Ok(Self::new(Arc::new(storage), config.s3.prefix.clone(), chunk_size))
            },
        }
    }

    /// Upload `artifact` as `remote_name`.
    ///
    /// The local file of an [`Artifact::OnDisk`] is removed only after the
    /// backend reports a completed upload.
    #[instrument(skip(self, artifact), fields(backend = self.storage.kind(), folder = %self.folder))]
    pub async fn upload(&self, artifact: &Artifact, remote_name: &str) -> Result<RemoteObject, StorageError> {
        let mut source = ChunkSource::from_artifact(artifact, self.chunk_size).await?;
        let total = source.total_len();

        let object = self.storage.upload(remote_name, &self.folder, &mut source).await?;

        info!(id = %object.id, size_bytes = total, "Upload complete");

        if let Some(path) = artifact.local_path() {
            remove_file_logged(path).await;
        }

        Ok(object)
    }
}
