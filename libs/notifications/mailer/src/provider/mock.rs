//! Mock mail provider for testing

use super::{MailProvider, SendResult};
use crate::models::Mail;
use async_trait::async_trait;
use eyre::Result;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Mock mail provider that captures sent mail
#[derive(Debug)]
pub struct MockProvider {
    sent: Arc<Mutex<Vec<Mail>>>,
    should_fail: bool,
    failure_message: Option<String>,
}

impl MockProvider {
    /// Create a new mock provider
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            should_fail: false,
            failure_message: None,
        }
    }

    /// Create a mock provider that always fails
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            should_fail: true,
            failure_message: Some(message.into()),
        }
    }

    /// Get all sent mail
    pub async fn sent_mail(&self) -> Vec<Mail> {
        self.sent.lock().await.clone()
    }

    /// Get the count of sent mail
    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// Clear all sent mail
    pub async fn clear(&self) {
        self.sent.lock().await.clear();
    }

    /// Check if a mail was sent to a specific address
    pub async fn was_sent_to(&self, address: &str) -> bool {
        self.sent.lock().await.iter().any(|m| m.to == address)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailProvider for MockProvider {
    async fn send(&self, mail: &Mail) -> Result<SendResult> {
        if self.should_fail {
            let message = self
                .failure_message
                .clone()
                .unwrap_or_else(|| "Mock failure".to_string());
            return Err(eyre::eyre!(message));
        }

        self.sent.lock().await.push(mail.clone());

        Ok(SendResult {
            message_id: format!("mock-{}", mail.id),
        })
    }

    async fn health_check(&self) -> Result<()> {
        if self.should_fail {
            return Err(eyre::eyre!("Mock health check failed"));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_sends_mail() {
        let provider = MockProvider::new();

        let mail = Mail::new("test@example.com", "Test Subject", "<p>Test body</p>");

        let result = provider.send(&mail).await;
        assert!(result.is_ok());

        let sent = provider.sent_mail().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "test@example.com");
    }

    #[tokio::test]
    async fn test_mock_provider_fails() {
        let provider = MockProvider::failing("Simulated failure");

        let mail = Mail::new("test@example.com", "Test Subject", "<p>Test body</p>");

        let result = provider.send(&mail).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Simulated failure"));
        assert_eq!(provider.sent_count().await, 0);
    }

    #[tokio::test]
    async fn test_mock_provider_was_sent_to() {
        let provider = MockProvider::new();

        let mail = Mail::new("user@example.com", "Test", "<p>Body</p>");
        provider.send(&mail).await.unwrap();

        assert!(provider.was_sent_to("user@example.com").await);
        assert!(!provider.was_sent_to("other@example.com").await);
    }
}
