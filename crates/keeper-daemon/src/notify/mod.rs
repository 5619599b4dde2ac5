//! Operator notifications
//!
//! Delivery is fire-and-forget from the pipeline's point of view: the
//! caller logs a [`NotifyError`] and moves on.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::NotifierConfig;

pub mod telegram;

pub use telegram::TelegramNotifier;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), NotifyError>;
}

/// Writes notifications to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        info!(target: "backup_keeper::notification", "{}", message);
        Ok(())
    }
}

/// Telegram when configured, the log otherwise.
pub fn build_notifier(config: &NotifierConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    match (&config.telegram_bot_token, &config.telegram_chat_id) {
        (Some(token), Some(chat_id)) => Ok(Arc::new(TelegramNotifier::new(
            &config.telegram_api_url,
            token,
            chat_id,
            config.timeout(),
        )?)),
        _ => Ok(Arc::new(LogNotifier)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        assert!(LogNotifier.notify("hello").await.is_ok());
    }

    #[test]
    fn test_build_without_telegram_uses_log() {
        let notifier = build_notifier(&NotifierConfig::default());
        assert!(notifier.is_ok());
    }
}
