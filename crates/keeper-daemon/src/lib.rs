//! Backup Keeper Daemon Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Scheduled, unattended backups of a MongoDB database to cloud object
//! storage, with an operator notification for every run.
//!
//! # Pipeline
//!
//! One run walks these stages strictly in order:
//!
//! 1. **Enumerate** the collections of the source ([`source::DataSource`])
//! 2. **Dump** every collection into bounded shard files ([`dump::ShardDumper`]);
//!    a failing collection is skipped, the rest still run
//! 3. **Package** all shards into one zip archive ([`archive::ArchivePackager`]);
//!    shard files are removed whatever the outcome
//! 4. **Upload** the archive in fixed-size chunks ([`storage::ChunkedUploader`]);
//!    the local archive is removed only after a successful transfer
//! 5. **Notify** the operator exactly once ([`notify::Notifier`])
//!
//! [`backup::BackupService`] owns the sequencing and the failure policy,
//! [`scheduler::CronScheduler`] triggers runs on a calendar schedule.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use keeper_daemon::{backup::BackupService, config::Config, source::MongoSource};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let source = Arc::new(MongoSource::connect(&config.source).await?);
//!     let service = BackupService::from_config(&config, source).await?;
//!     let outcome = service.run_once().await;
//!     tracing::info!(?outcome, "backup finished");
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod backup;
pub mod config;
pub mod dump;
pub mod error;
pub mod notify;
pub mod scheduler;
pub mod source;
pub mod storage;

pub use error::{BackupError, BackupResult};
