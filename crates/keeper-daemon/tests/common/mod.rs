//! Shared fakes for integration tests
#![allow(dead_code, clippy::unwrap_used)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use keeper_common::{KeeperError, Result};
use keeper_daemon::{
    backup::BackupService,
    config::BackupConfig,
    notify::{Notifier, NotifyError},
    source::{DataSource, RecordStream},
    storage::{ChunkSource, ChunkedUploader, RemoteObject, RemoteStorage, StorageError},
};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// In-memory data source
#[derive(Default)]
pub struct MemorySource {
    data: BTreeMap<String, usize>,
    broken: HashSet<String>,
    listing_error: Option<String>,
    gate: Option<Arc<Gate>>,
    sweep: Option<(String, PathBuf)>,
}

/// Holds enumeration until released; `entered` fires once a run is inside.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, data_set: &str, records: usize) -> Self {
        self.data.insert(data_set.to_string(), records);
        self
    }

    /// Cursor over `data_set` fails after its first record.
    pub fn broken(mut self, data_set: &str) -> Self {
        self.broken.insert(data_set.to_string());
        self
    }

    pub fn failing_listing(mut self, message: &str) -> Self {
        self.listing_error = Some(message.to_string());
        self
    }

    pub fn gated(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Opening the cursor of `data_set` first deletes every file in `dir`,
    /// so shards written earlier in the run are gone by packaging time.
    pub fn sweeping_before(mut self, data_set: &str, dir: &Path) -> Self {
        self.sweep = Some((data_set.to_string(), dir.to_path_buf()));
        self
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn list_data_sets(&self) -> Result<Vec<String>> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if let Some(message) = &self.listing_error {
            return Err(KeeperError::database(message));
        }
        Ok(self.data.keys().cloned().collect())
    }

    async fn open_cursor(&self, data_set: &str) -> Result<RecordStream> {
        if let Some((target, dir)) = &self.sweep {
            if target == data_set {
                for entry in std::fs::read_dir(dir)? {
                    std::fs::remove_file(entry?.path())?;
                }
            }
        }
        let count = self.data.get(data_set).copied().unwrap_or(0);
        let name = data_set.to_string();
        let records = (0..count).map(move |i| Ok(json!({ "_id": i, "set": name })));

        if self.broken.contains(data_set) {
            let failure = std::iter::once(Err(KeeperError::database("cursor id not found")));
            return Ok(stream::iter(records.take(1).chain(failure)).boxed());
        }
        Ok(stream::iter(records).boxed())
    }
}

/// One completed upload
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub folder: String,
    pub body: Vec<u8>,
    pub chunks: usize,
}

impl Upload {
    /// Entry names of the uploaded zip, sorted
    pub fn entries(&self) -> Vec<String> {
        let zip = zip::ZipArchive::new(Cursor::new(self.body.clone())).unwrap();
        let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
        names.sort();
        names
    }
}

#[derive(Default)]
pub struct RecordingStorage {
    pub uploads: Mutex<Vec<Upload>>,
    pub fail_with: Option<u16>,
}

impl RecordingStorage {
    pub fn failing(status: u16) -> Self {
        Self {
            uploads: Mutex::new(Vec::new()),
            fail_with: Some(status),
        }
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteStorage for RecordingStorage {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn upload(
        &self,
        remote_name: &str,
        folder: &str,
        source: &mut ChunkSource,
    ) -> std::result::Result<RemoteObject, StorageError> {
        if let Some(status) = self.fail_with {
            return Err(StorageError::Rejected {
                status,
                body: "upload refused".to_string(),
            });
        }

        let mut body = Vec::new();
        let mut chunks = 0;
        while let Some(chunk) = source.next_chunk().await? {
            body.extend_from_slice(&chunk);
            chunks += 1;
        }

        let size = body.len() as u64;
        self.uploads.lock().unwrap().push(Upload {
            name: remote_name.to_string(),
            folder: folder.to_string(),
            body,
            chunks,
        });

        Ok(RemoteObject {
            id: format!("obj-{remote_name}"),
            name: remote_name.to_string(),
            size,
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) -> std::result::Result<(), NotifyError> {
        self.messages.lock().unwrap().push(message.to_string());
        if self.fail {
            return Err(NotifyError::Rejected {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        Ok(())
    }
}

pub fn backup_config(work_dir: &Path, batch_size: usize) -> BackupConfig {
    BackupConfig {
        data_source: "test-cluster".to_string(),
        batch_size,
        work_dir: work_dir.to_path_buf(),
        ..BackupConfig::default()
    }
}

pub fn service(
    work_dir: &Path,
    batch_size: usize,
    source: MemorySource,
    storage: Arc<RecordingStorage>,
    notifier: Arc<RecordingNotifier>,
) -> BackupService {
    let uploader = ChunkedUploader::new(storage, "backups", 64);
    BackupService::new(&backup_config(work_dir, batch_size), Arc::new(source), uploader, notifier).unwrap()
}

/// File names left in `dir`, sorted
pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}
