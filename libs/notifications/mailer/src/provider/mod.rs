//! Mail provider implementations

pub mod mock;
pub mod smtp;

pub use mock::MockProvider;
pub use smtp::{SmtpConfig, SmtpProvider};

use std::sync::Arc;

use crate::models::Mail;
use async_trait::async_trait;
use eyre::Result;

/// Result of sending a mail
#[derive(Debug)]
pub struct SendResult {
    /// Provider-specific message ID
    pub message_id: String,
}

/// Trait for mail providers
#[async_trait]
pub trait MailProvider: std::fmt::Debug + Send + Sync {
    /// Send a mail
    async fn send(&self, mail: &Mail) -> Result<SendResult>;

    /// Check if the provider is healthy
    async fn health_check(&self) -> Result<()>;

    /// Get provider name
    fn name(&self) -> &'static str;
}

/// Resolves the configured driver name to a provider, once, at startup.
/// Unknown names are a configuration error.
pub fn provider_from_config(driver: &str) -> Result<Arc<dyn MailProvider>> {
    match driver {
        "smtp" => Ok(Arc::new(SmtpProvider::from_env()?)),
        "mock" => Ok(Arc::new(MockProvider::new())),
        other => Err(eyre::eyre!("Unknown mail driver: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_driver_is_a_config_error() {
        let err = provider_from_config("carrier-pigeon").unwrap_err();
        assert!(err.to_string().contains("carrier-pigeon"));
    }

    #[test]
    fn mock_driver_resolves() {
        let provider = provider_from_config("mock").unwrap();
        assert_eq!(provider.name(), "mock");
    }
}
