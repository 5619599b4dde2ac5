//! Streaming collections into bounded shard files
//!
//! Records are pulled through a forward cursor and buffered in memory until
//! the buffer holds `capacity` records, at which point it is written out as
//! one newline-delimited JSON shard and cleared. The last shard of a data
//! set holds the remainder (`1..=capacity` records); an empty data set
//! produces no shard at all.
//!
//! Shards are named `<dataSet>_part_<index>_size_<count>` with a 1-based
//! index, so names are unique within a run.

use futures::TryStreamExt;
use keeper_common::{KeeperError, Result};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

use crate::error::{BackupError, BackupResult};
use crate::source::{DataSource, Record};

/// Upper bound for the up-front buffer allocation; larger capacities grow on demand.
const MAX_PREALLOCATED_RECORDS: usize = 10_000;

/// One shard file written during the current run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFile {
    pub data_set: String,
    pub index: usize,
    pub record_count: usize,
    pub path: PathBuf,
}

/// A data set that could not be dumped, with the reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDataSet {
    pub data_set: String,
    pub reason: String,
}

/// Result of dumping every data set of a run
#[derive(Debug, Default)]
pub struct DumpSummary {
    /// All shards, grouped by data set in dump order
    pub shards: Vec<ShardFile>,
    pub dumped: Vec<String>,
    pub skipped: Vec<SkippedDataSet>,
}

impl DumpSummary {
    pub fn total_records(&self) -> usize {
        self.shards.iter().map(|s| s.record_count).sum()
    }

    pub fn shard_paths(&self) -> Vec<PathBuf> {
        self.shards.iter().map(|s| s.path.clone()).collect()
    }
}

/// Path separators in `data_set` are replaced with `_` so the shard stays
/// a plain file inside the work directory.
pub fn shard_file_name(data_set: &str, index: usize, record_count: usize) -> String {
    let base: String = data_set
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    format!("{base}_part_{index}_size_{record_count}")
}

pub struct ShardDumper {
    work_dir: PathBuf,
    capacity: usize,
}

impl ShardDumper {
    /// `capacity` is clamped to at least one record.
    pub fn new(work_dir: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            work_dir: work_dir.into(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Dump every data set in order. A failing data set is logged and
    /// recorded in [`DumpSummary::skipped`]; the others still run.
    pub async fn dump_all(&self, source: &dyn DataSource, data_sets: &[String]) -> DumpSummary {
        let mut summary = DumpSummary::default();

        for data_set in data_sets {
            match self.dump(source, data_set).await {
                Ok(shards) => {
                    summary.shards.extend(shards);
                    summary.dumped.push(data_set.clone());
                },
                Err(e) => {
                    warn!(data_set = %data_set, error = %e, "Skipping data set");
                    summary.skipped.push(SkippedDataSet {
                        data_set: data_set.clone(),
                        reason: e.to_string(),
                    });
                },
            }
        }

        summary
    }

    /// Dump one data set into shard files.
    ///
    /// On failure, shards already written for this data set are removed so
    /// that a partially read collection never ends up in the archive.
    #[instrument(skip(self, source), fields(capacity = self.capacity))]
    pub async fn dump(
        &self,
        source: &dyn DataSource,
        data_set: &str,
    ) -> BackupResult<Vec<ShardFile>> {
        let mut written = Vec::new();

        match self.write_shards(source, data_set, &mut written).await {
            Ok(()) => {
                info!(
                    shards = written.len(),
                    records = written.iter().map(|s| s.record_count).sum::<usize>(),
                    "Data set dumped"
                );
                Ok(written)
            },
            Err(cause) => {
                for shard in &written {
                    remove_file_logged(&shard.path).await;
                }
                Err(BackupError::DataSetDump {
                    data_set: data_set.to_string(),
                    source: cause,
                })
            },
        }
    }

    async fn write_shards(
        &self,
        source: &dyn DataSource,
        data_set: &str,
        written: &mut Vec<ShardFile>,
    ) -> Result<()> {
        let mut cursor = source.open_cursor(data_set).await?;
        let mut buffer: Vec<Record> = Vec::with_capacity(self.capacity.min(MAX_PREALLOCATED_RECORDS));

        while let Some(record) = cursor.try_next().await? {
            buffer.push(record);
            if buffer.len() == self.capacity {
                let shard = self.flush(data_set, written.len() + 1, &buffer).await?;
                written.push(shard);
                buffer.clear();
            }
        }

        if !buffer.is_empty() {
            let shard = self.flush(data_set, written.len() + 1, &buffer).await?;
            written.push(shard);
        }

        Ok(())
    }

    async fn flush(&self, data_set: &str, index: usize, records: &[Record]) -> Result<ShardFile> {
        let path = self
            .work_dir
            .join(shard_file_name(data_set, index, records.len()));

        if let Err(e) = write_ndjson(&path, records).await {
            remove_file_logged(&path).await;
            return Err(e);
        }

        debug!(path = %path.display(), records = records.len(), "Shard written");

        Ok(ShardFile {
            data_set: data_set.to_string(),
            index,
            record_count: records.len(),
            path,
        })
    }
}

async fn write_ndjson(path: &Path, records: &[Record]) -> Result<()> {
    let file = tokio::fs::File::create(path).await?;
    let mut writer = BufWriter::new(file);

    for record in records {
        let line = serde_json::to_vec(record).map_err(KeeperError::from)?;
        writer.write_all(&line).await?;
        writer.write_all(b"\n").await?;
    }

    writer.flush().await?;
    Ok(())
}

/// Best-effort removal of a temporary file; failures are only logged.
pub(crate) async fn remove_file_logged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed temporary file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temporary file"),
    }
}
