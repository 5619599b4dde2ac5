//! Backup Keeper - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use keeper_common::logging::{init_logging, LogConfig};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use keeper_daemon::{
    backup::BackupService, config::Config, scheduler::CronScheduler, source::MongoSource,
};

#[derive(Parser, Debug)]
#[command(name = "backup-keeper", version, about = "Scheduled MongoDB backups to cloud storage")]
struct Cli {
    /// Run a single backup and exit instead of starting the scheduler
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Defaults for this binary; LOG_* variables take precedence
    let log_config = LogConfig::builder()
        .log_file_prefix("backup-keeper")
        .filter_directives("keeper_daemon=info,mongodb=warn,aws_config=warn,aws_smithy_runtime=warn")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting Backup Keeper");

    let config = Config::load().context("Failed to load configuration")?;
    info!(
        database = %config.source.database,
        backend = ?config.storage.backend,
        schedule = %config.backup.cron_schedule,
        timezone = %config.backup.timezone,
        "Configuration loaded"
    );

    let source = Arc::new(
        MongoSource::connect(&config.source)
            .await
            .context("Cannot reach the source database")?,
    );

    let service = Arc::new(BackupService::from_config(&config, source.clone()).await?);

    let code = if cli.once {
        let outcome = service.run_once().await;
        if outcome.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    } else {
        run_daemon(&config, service).await?;
        ExitCode::SUCCESS
    };

    source.close().await;
    info!("Backup Keeper stopped");

    Ok(code)
}

async fn run_daemon(config: &Config, service: Arc<BackupService>) -> Result<()> {
    // Run tasks, drained on shutdown
    let runs = TaskTracker::new();

    if config.backup.run_on_startup {
        info!("Triggering startup backup");
        let service = service.clone();
        runs.spawn(async move {
            service.trigger().await;
        });
    }

    let scheduler = CronScheduler::new(&config.backup.cron_schedule, config.backup.tz()?)?;
    let stop = CancellationToken::new();
    let scheduled = service.clone();
    let scheduler_handle = scheduler.start(
        move || {
            let service = scheduled.clone();
            async move {
                service.trigger().await;
            }
        },
        stop.clone(),
        runs.clone(),
    );

    shutdown_signal().await;

    stop.cancel();
    if let Err(e) = scheduler_handle.await {
        error!("Scheduler task failed: {}", e);
    }

    runs.close();
    let timeout = config.backup.shutdown_timeout();
    info!("Waiting up to {} seconds for a running backup to finish", timeout.as_secs());
    if tokio::time::timeout(timeout, runs.wait()).await.is_err() {
        warn!("Backup still running after shutdown timeout, exiting anyway");
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
