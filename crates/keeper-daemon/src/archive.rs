//! Packaging shard files into one zip archive
//!
//! The archive is written on the blocking pool; shard contents are streamed
//! into the zip entries, never loaded whole. Every shard handed to
//! [`ArchivePackager::pack`] is deleted once packaging has been attempted,
//! whether it succeeded or not.

use chrono::{DateTime, TimeZone};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::dump::remove_file_logged;
use crate::error::{BackupError, BackupResult};

/// Archive name for a run started at `started`, at second resolution.
pub fn archive_file_name<Tz: TimeZone>(started: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("dump_{}.zip", started.format("%Y%m%d_%H%M%S"))
}

/// A packaged archive on local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArchive {
    pub path: PathBuf,
    pub entries: usize,
    pub size_bytes: u64,
    pub sha256: String,
}

impl PackagedArchive {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub struct ArchivePackager {
    work_dir: PathBuf,
}

impl ArchivePackager {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    /// Bundle `shards` into `<work_dir>/<archive_name>`.
    ///
    /// Entry names are the shard base names. The shard files are removed
    /// afterwards in every case; a partially written archive is removed on
    /// failure.
    #[instrument(skip(self, shards), fields(shards = shards.len()))]
    pub async fn pack(
        &self,
        shards: Vec<PathBuf>,
        archive_name: &str,
    ) -> BackupResult<PackagedArchive> {
        let archive_path = self.work_dir.join(archive_name);

        let result = {
            let archive_path = archive_path.clone();
            let shards = shards.clone();
            tokio::task::spawn_blocking(move || write_archive(&archive_path, &shards))
                .await
                .map_err(BackupError::packaging)
                .and_then(|inner| inner)
        };

        for shard in &shards {
            remove_file_logged(shard).await;
        }

        match result {
            Ok(archive) => {
                info!(
                    archive = %archive.path.display(),
                    entries = archive.entries,
                    size_bytes = archive.size_bytes,
                    sha256 = %archive.sha256,
                    "Archive packaged"
                );
                Ok(archive)
            },
            Err(e) => {
                warn!(archive = %archive_path.display(), "Removing incomplete archive");
                remove_file_logged(&archive_path).await;
                Err(e)
            },
        }
    }
}

fn write_archive(archive_path: &Path, shards: &[PathBuf]) -> BackupResult<PackagedArchive> {
    let file = File::create(archive_path).map_err(BackupError::packaging)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    for shard in shards {
        let entry_name = shard
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                BackupError::Packaging(format!("shard path has no file name: {}", shard.display()))
            })?;

        let mut input = File::open(shard)
            .map_err(|e| BackupError::Packaging(format!("{}: {}", shard.display(), e)))?;
        zip.start_file(entry_name, options)
            .map_err(BackupError::packaging)?;
        std::io::copy(&mut input, &mut zip)
            .map_err(|e| BackupError::Packaging(format!("{}: {}", shard.display(), e)))?;
    }

    let writer = zip.finish().map_err(BackupError::packaging)?;
    writer
        .into_inner()
        .map_err(|e| BackupError::packaging(e.error()))?
        .sync_all()
        .map_err(BackupError::packaging)?;

    let size_bytes = std::fs::metadata(archive_path)
        .map_err(BackupError::packaging)?
        .len();
    let sha256 = keeper_common::checksum::sha256_file(archive_path).map_err(BackupError::packaging)?;

    Ok(PackagedArchive {
        path: archive_path.to_path_buf(),
        entries: shards.len(),
        size_bytes,
        sha256,
    })
}
