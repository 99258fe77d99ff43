//! Operator notifications
//!
//! One text message per reconciliation outcome, plus one for a fatal error
//! that stops the watch loop.

#[cfg(feature = "telegram")]
mod telegram;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::NotifyConfig;

#[cfg(feature = "telegram")]
pub use telegram::TelegramNotifier;

/// A channel that delivers plain-text messages to an operator
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Notifier used when no channel is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        tracing::debug!("Notifications disabled, dropping: {}", message);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Pick the notifier for a configuration
pub fn notifier_from_config(config: &NotifyConfig) -> Arc<dyn Notifier> {
    if !config.is_active() {
        return Arc::new(DisabledNotifier);
    }

    #[cfg(feature = "telegram")]
    {
        match TelegramNotifier::from_config(config) {
            Ok(notifier) => return Arc::new(notifier),
            Err(e) => tracing::warn!("Telegram notifier unavailable: {}", e),
        }
    }

    #[cfg(not(feature = "telegram"))]
    tracing::warn!("Notifications configured but the telegram feature is not enabled");

    Arc::new(DisabledNotifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_notifier_accepts_everything() {
        let notifier = DisabledNotifier;
        assert!(notifier.send("hello").await.is_ok());
        assert_eq!(notifier.name(), "disabled");
    }

    #[test]
    fn test_inactive_config_yields_disabled() {
        let config = NotifyConfig {
            bot_token: Some("123:abc".to_string()),
            chat_id: None,
            enabled: true,
            ..NotifyConfig::default()
        };
        assert_eq!(notifier_from_config(&config).name(), "disabled");

        let config = NotifyConfig {
            bot_token: Some("123:abc".to_string()),
            chat_id: Some("42".to_string()),
            enabled: false,
            ..NotifyConfig::default()
        };
        assert_eq!(notifier_from_config(&config).name(), "disabled");
    }

    #[cfg(feature = "telegram")]
    #[test]
    fn test_active_config_yields_telegram() {
        let config = NotifyConfig {
            bot_token: Some("123:abc".to_string()),
            chat_id: Some("42".to_string()),
            enabled: true,
            ..NotifyConfig::default()
        };
        assert_eq!(notifier_from_config(&config).name(), "telegram");
    }
}
