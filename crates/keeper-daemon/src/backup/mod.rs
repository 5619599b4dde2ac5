//! Backup orchestration
//!
//! A run moves through `Enumerating -> Dumping -> Packaging -> Uploading`
//! and ends with exactly one notification. A failure in enumeration,
//! packaging or upload ends the run at that stage; a failing data set is
//! only skipped.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::archive::{archive_file_name, ArchivePackager};
use crate::config::{BackupConfig, Config};
use crate::dump::{ShardDumper, SkippedDataSet};
use crate::error::BackupError;
use crate::notify::{build_notifier, Notifier};
use crate::source::DataSource;
use crate::storage::{Artifact, ChunkedUploader};

pub mod message;

/// Stage at which a run can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Enumeration,
    Packaging,
    Upload,
}

impl RunStage {
    /// Name used in operator messages
    pub fn label(&self) -> &'static str {
        match self {
            RunStage::Enumeration => "collection",
            RunStage::Packaging => "packaging",
            RunStage::Upload => "upload",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Success {
        /// Name of the uploaded archive
        archive: String,
        remote_id: String,
        records: usize,
        skipped: Vec<SkippedDataSet>,
    },
    Failure {
        stage: RunStage,
        cause: String,
    },
}

impl BackupOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BackupOutcome::Success { .. })
    }

    fn failed(stage: RunStage, err: BackupError) -> Self {
        error!(stage = %stage, error = %err, "Backup run failed");
        BackupOutcome::Failure {
            stage,
            cause: err.to_string(),
        }
    }
}

pub struct BackupService {
    source: Arc<dyn DataSource>,
    dumper: ShardDumper,
    packager: ArchivePackager,
    uploader: ChunkedUploader,
    notifier: Arc<dyn Notifier>,
    data_source_label: String,
    timezone: Tz,
    run_lock: Mutex<()>,
}

impl BackupService {
    pub fn new(
        config: &BackupConfig,
        source: Arc<dyn DataSource>,
        uploader: ChunkedUploader,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            source,
            dumper: ShardDumper::new(config.work_dir.clone(), config.batch_size),
            packager: ArchivePackager::new(config.work_dir.clone()),
            uploader,
            notifier,
            data_source_label: config.data_source.clone(),
            timezone: config.tz()?,
            run_lock: Mutex::new(()),
        })
    }

    /// Wire the configured storage backend and notifier around `source`.
    pub async fn from_config(config: &Config, source: Arc<dyn DataSource>) -> anyhow::Result<Self> {
        let uploader = ChunkedUploader::from_config(&config.storage)
            .await
            .map_err(|e| BackupError::Config(format!("storage: {e}")))?;
        let notifier = build_notifier(&config.notifier)
            .map_err(|e| BackupError::Config(format!("notifier: {e}")))?;

        Self::new(&config.backup, source, uploader, notifier)
    }

    /// Run one backup, waiting for a run in progress to finish first.
    pub async fn run_once(&self) -> BackupOutcome {
        let _guard = self.run_lock.lock().await;
        self.run_and_notify(Utc::now()).await
    }

    /// Run one backup unless another run is in progress. A skipped trigger
    /// returns `None` and sends no notification.
    pub async fn trigger(&self) -> Option<BackupOutcome> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!("Previous backup run still in progress, skipping this trigger");
            return None;
        };
        Some(self.run_and_notify(Utc::now()).await)
    }

    async fn run_and_notify(&self, started: DateTime<Utc>) -> BackupOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!("backup_run", %run_id);

        async {
            info!("Backup run started");
            let outcome = self.execute(started).await;

            let text = message::render(&self.data_source_label, &outcome);
            if let Err(e) = self.notifier.notify(&text).await {
                let err = BackupError::from(e);
                warn!(error = %err, "Notification not delivered");
            }

            info!(success = outcome.is_success(), "Backup run finished");
            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, started: DateTime<Utc>) -> BackupOutcome {
        info!("Enumerating data sets");
        let data_sets = match self.source.list_data_sets().await {
            Ok(names) => names,
            Err(e) => return BackupOutcome::failed(RunStage::Enumeration, BackupError::Enumeration(e)),
        };
        info!(count = data_sets.len(), "Dumping data sets");

        let summary = self.dumper.dump_all(self.source.as_ref(), &data_sets).await;
        info!(
            dumped = summary.dumped.len(),
            skipped = summary.skipped.len(),
            shards = summary.shards.len(),
            records = summary.total_records(),
            "Dump finished"
        );

        info!("Packaging archive");
        let archive_name = archive_file_name(&started.with_timezone(&self.timezone));
        let archive = match self.packager.pack(summary.shard_paths(), &archive_name).await {
            Ok(archive) => archive,
            Err(e) => return BackupOutcome::failed(RunStage::Packaging, e),
        };

        info!(archive = %archive_name, "Uploading archive");
        let remote = match self
            .uploader
            .upload(&Artifact::OnDisk(archive.path.clone()), &archive_name)
            .await
        {
            Ok(remote) => remote,
            Err(e) => return BackupOutcome::failed(RunStage::Upload, BackupError::Upload(e)),
        };

        BackupOutcome::Success {
            archive: archive_name,
            remote_id: remote.id,
            records: summary.total_records(),
            skipped: summary.skipped,
        }
    }
}
