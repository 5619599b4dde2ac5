//! Calendar scheduler
//!
//! Evaluates a cron expression in a named time zone and spawns the job at
//! every fire time onto a [`TaskTracker`]. Stopping the scheduler (cancelling
//! its token) prevents further triggers; a job already spawned keeps running
//! and can be awaited through the tracker.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Parse a cron expression.
///
/// Classic 5-field expressions (`min hour dom month dow`) are accepted and
/// run at second 0; 6/7-field expressions and `@daily`-style shortcuts are
/// passed through unchanged.
pub fn parse_schedule(expression: &str) -> anyhow::Result<Schedule> {
    let expression = expression.trim();
    let normalized = if !expression.starts_with('@') && expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    };

    Schedule::from_str(&normalized).map_err(|e| anyhow::anyhow!("{}", e))
}

pub struct CronScheduler {
    expression: String,
    schedule: Schedule,
    timezone: Tz,
}

impl CronScheduler {
    pub fn new(expression: &str, timezone: Tz) -> anyhow::Result<Self> {
        Ok(Self {
            expression: expression.trim().to_string(),
            schedule: parse_schedule(expression)?,
            timezone,
        })
    }

    /// First fire time strictly after `instant`.
    pub fn next_after(&self, instant: &DateTime<Utc>) -> Option<DateTime<Tz>> {
        self.schedule
            .after(&instant.with_timezone(&self.timezone))
            .next()
    }

    /// Run the trigger loop until `cancel` fires. Each trigger spawns `job`
    /// as its own task on `tasks`.
    pub fn start<F, Fut>(self, job: F, cancel: CancellationToken, tasks: TaskTracker) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job = Arc::new(job);

        tokio::spawn(async move {
            info!(
                schedule = %self.expression,
                timezone = %self.timezone,
                "Scheduler started"
            );

            let mut last_fired = Utc::now();

            loop {
                let from = last_fired.max(Utc::now());
                let Some(next) = self.next_after(&from) else {
                    warn!(schedule = %self.expression, "Schedule has no upcoming fire time");
                    break;
                };

                let next_utc = next.with_timezone(&Utc);
                let wait = (next_utc - Utc::now()).to_std().unwrap_or_default();
                debug!(next = %next, "Next backup scheduled");

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {
                        last_fired = next_utc;
                        info!(scheduled_for = %next, "Schedule triggered");
                        tasks.spawn((job.as_ref())());
                    },
                }
            }

            info!("Scheduler stopped");
        })
    }
}
