//! Configuration management
//!
//! One [`Config`] value is built at startup and handed to each component;
//! nothing reads the environment after that.

use anyhow::Context;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::scheduler::parse_schedule;
use crate::storage::config::StorageConfig;

// ============================================================================
// Defaults
// ============================================================================

/// Default database name.
pub const DEFAULT_DATABASE: &str = "jcce";

/// Default MongoDB connect and server-selection timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default schedule: every day at 02:00.
pub const DEFAULT_CRON_SCHEDULE: &str = "0 2 * * *";

/// Default IANA time zone for the schedule and archive timestamps.
pub const DEFAULT_TIMEZONE: &str = "Asia/Ho_Chi_Minh";

/// Default shard capacity in records.
pub const DEFAULT_BATCH_SIZE: usize = 100_000;

/// Default grace period for an in-flight run at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default Telegram Bot API base URL.
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Default notification HTTP timeout in seconds.
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 20;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub backup: BackupConfig,
    pub storage: StorageConfig,
    pub notifier: NotifierConfig,
}

/// Document database connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub uri: String,
    pub database: String,
    /// Allow-list of collections; empty means every collection
    pub collections: Vec<String>,
    pub connect_timeout_secs: u64,
}

/// Run settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Human label put in front of every notification
    pub data_source: String,
    pub cron_schedule: String,
    pub timezone: String,
    /// Records per shard file
    pub batch_size: usize,
    /// Where shards and the archive are written
    pub work_dir: PathBuf,
    pub run_on_startup: bool,
    pub shutdown_timeout_secs: u64,
}

/// Operator notification channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_api_url: String,
    pub timeout_secs: u64,
}

pub(crate) fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub(crate) fn env_optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub(crate) fn env_parsed<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from `.env` (if present) and the environment
    pub fn load() -> anyhow::Result<Self> {
        if dotenvy::dotenv().is_err() {
            tracing::debug!("No .env file found, using process environment only");
        }

        let config = Config {
            source: SourceConfig::from_env(),
            backup: BackupConfig::from_env(),
            storage: StorageConfig::from_env(),
            notifier: NotifierConfig::from_env(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.source.uri.is_empty() {
            anyhow::bail!("MONGODB_URI must be set");
        }
        if self.source.database.is_empty() {
            anyhow::bail!("MONGODB_DATABASE cannot be empty");
        }
        if self.source.connect_timeout_secs == 0 {
            anyhow::bail!("MONGODB_CONNECT_TIMEOUT_SECS must be greater than 0");
        }

        self.backup.validate()?;
        self.storage.validate()?;

        if self.notifier.telegram_bot_token.is_some() != self.notifier.telegram_chat_id.is_some() {
            anyhow::bail!("TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID must be set together");
        }
        if self.notifier.telegram_bot_token.is_none() {
            tracing::warn!("Telegram is not configured - notifications will only be logged");
        }

        Ok(())
    }
}

impl SourceConfig {
    pub fn from_env() -> Self {
        Self {
            uri: env_string("MONGODB_URI", ""),
            database: env_string("MONGODB_DATABASE", DEFAULT_DATABASE),
            collections: env_string("BACKUP_COLLECTIONS", "")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            connect_timeout_secs: env_parsed(
                "MONGODB_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            ),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl BackupConfig {
    pub fn from_env() -> Self {
        Self {
            data_source: env_string("BACKUP_DATA_SOURCE", ""),
            cron_schedule: env_string("BACKUP_CRON_SCHEDULE", DEFAULT_CRON_SCHEDULE),
            timezone: env_string("BACKUP_TIMEZONE", DEFAULT_TIMEZONE),
            batch_size: env_parsed("BACKUP_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            work_dir: PathBuf::from(env_string("BACKUP_WORK_DIR", ".")),
            run_on_startup: env_parsed("BACKUP_RUN_ON_STARTUP", true),
            shutdown_timeout_secs: env_parsed(
                "BACKUP_SHUTDOWN_TIMEOUT_SECS",
                DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            ),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("BACKUP_BATCH_SIZE must be greater than 0");
        }
        self.tz()?;
        parse_schedule(&self.cron_schedule)
            .with_context(|| format!("Invalid BACKUP_CRON_SCHEDULE: {}", self.cron_schedule))?;
        Ok(())
    }

    /// Parsed [`BackupConfig::timezone`]
    pub fn tz(&self) -> anyhow::Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid BACKUP_TIMEZONE '{}': {}", self.timezone, e))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl NotifierConfig {
    pub fn from_env() -> Self {
        Self {
            telegram_bot_token: env_optional("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: env_optional("TELEGRAM_CHAT_ID"),
            telegram_api_url: env_string("TELEGRAM_API_URL", DEFAULT_TELEGRAM_API_URL),
            timeout_secs: env_parsed("NOTIFY_TIMEOUT_SECS", DEFAULT_NOTIFY_TIMEOUT_SECS),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            data_source: String::new(),
            cron_schedule: DEFAULT_CRON_SCHEDULE.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            work_dir: PathBuf::from("."),
            run_on_startup: true,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            telegram_chat_id: None,
            telegram_api_url: DEFAULT_TELEGRAM_API_URL.to_string(),
            timeout_secs: DEFAULT_NOTIFY_TIMEOUT_SECS,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::config::StorageBackend;
    use serial_test::serial;

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                uri: "mongodb://localhost:27017".to_string(),
                database: DEFAULT_DATABASE.to_string(),
                collections: Vec::new(),
                connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            },
            backup: BackupConfig::default(),
            storage: StorageConfig::default(),
            notifier: NotifierConfig::default(),
        }
    }

    #[test]
    fn test_defaults_validate() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_uri_rejected() {
        let mut config = valid_config();
        config.source.uri.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = valid_config();
        config.backup.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_timezone_rejected() {
        let mut config = valid_config();
        config.backup.timezone = "Mars/Olympus_Mons".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_cron_rejected() {
        let mut config = valid_config();
        config.backup.cron_schedule = "every day at two".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_half_configured_telegram_rejected() {
        let mut config = valid_config();
        config.notifier.telegram_bot_token = Some("123:abc".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("MONGODB_URI", "mongodb://db.internal:27017");
        std::env::set_var("BACKUP_COLLECTIONS", "orders, users,,");
        std::env::set_var("BACKUP_BATCH_SIZE", "500");
        std::env::set_var("BACKUP_TIMEZONE", "Europe/Berlin");
        std::env::set_var("STORAGE_BACKEND", "s3");

        let source = SourceConfig::from_env();
        let backup = BackupConfig::from_env();
        let storage = StorageConfig::from_env();

        assert_eq!(source.uri, "mongodb://db.internal:27017");
        assert_eq!(source.collections, vec!["orders", "users"]);
        assert_eq!(backup.batch_size, 500);
        assert_eq!(backup.tz().unwrap(), chrono_tz::Europe::Berlin);
        assert_eq!(storage.backend, StorageBackend::S3);

        for key in [
            "MONGODB_URI",
            "BACKUP_COLLECTIONS",
            "BACKUP_BATCH_SIZE",
            "BACKUP_TIMEZONE",
            "STORAGE_BACKEND",
        ] {
            std::env::remove_var(key);
        }
    }
}
