//! Invites reviewers to a freshly opened poll.

use std::sync::Arc;

use amqp_worker::lapin::message::Delivery;
use amqp_worker::{DeliveryContext, DeliveryHandler};
use async_trait::async_trait;
use eyre::Result;
use mailer::{Mail, MailProvider, TemplateEngine};
use serde_json::json;
use tracing::{debug, info};

use crate::models::PollCreatedMessage;

pub struct PollCreatedHandler {
    provider: Arc<dyn MailProvider>,
    templates: Arc<TemplateEngine>,
}

impl PollCreatedHandler {
    pub fn new(provider: Arc<dyn MailProvider>, templates: Arc<TemplateEngine>) -> Self {
        Self {
            provider,
            templates,
        }
    }

    async fn process(&self, message: PollCreatedMessage) -> Result<()> {
        let html = self.templates.render(
            "poll_created",
            &json!({
                "username": message.user_name,
                "created_at": message.created_at.to_string(),
                "poll_id": message.id,
                "hitokoto": message.hitokoto,
                "from": message.from,
                "from_who": message.from_who.as_deref().unwrap_or(""),
                "type": message.kind.label(),
                "creator": message.creator,
            }),
        )?;

        let mail = Mail::new(&message.to, "喵！新的野生投票菌出现了！", html);
        self.provider.send(&mail).await?;
        info!(to = %message.to, poll_id = message.id, "Poll invitation sent");
        Ok(())
    }
}

#[async_trait]
impl DeliveryHandler for PollCreatedHandler {
    async fn handle(&self, _ctx: DeliveryContext, delivery: &Delivery) -> Result<()> {
        debug!(body = %String::from_utf8_lossy(&delivery.data), "Received poll opening");
        let message = super::parse_payload(&delivery.data)?;
        self.process(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailer::MockProvider;

    #[tokio::test]
    async fn sends_the_poll_invitation() {
        let mock = Arc::new(MockProvider::new());
        let handler =
            PollCreatedHandler::new(mock.clone(), Arc::new(TemplateEngine::new().unwrap()));

        let message: PollCreatedMessage = super::super::parse_payload(
            r#"{
                "to": "reviewer@example.com",
                "uuid": "27d0f1b4-8c3e-4f5a-9b2d-6e7a8c9d0e1f",
                "hitokoto": "测试句子",
                "from": "某处",
                "type": "d",
                "from_who": null,
                "creator": "某人",
                "user_name": "审核员甲",
                "id": 1024,
                "created_at": "2023-10-03T15:39:55+08:00"
            }"#
            .as_bytes(),
        )
        .unwrap();

        handler.process(message).await.unwrap();

        let sent = mock.sent_mail().await;
        assert_eq!(sent[0].to, "reviewer@example.com");
        assert_eq!(sent[0].subject, "喵！新的野生投票菌出现了！");
        assert!(sent[0].body.contains("#1024"));
        assert!(sent[0].body.contains("审核员甲"));
        assert!(sent[0].body.contains("https://hitokoto.cn"));
    }

    #[tokio::test]
    async fn zero_poll_id_fails_validation() {
        let raw = r#"{
            "to": "reviewer@example.com",
            "uuid": "27d0f1b4-8c3e-4f5a-9b2d-6e7a8c9d0e1f",
            "hitokoto": "测试句子",
            "from": "某处",
            "type": "d",
            "creator": "某人",
            "user_name": "审核员甲",
            "id": 0,
            "created_at": "1696315195"
        }"#
        .as_bytes();
        assert!(super::super::parse_payload::<PollCreatedMessage>(raw).is_err());
    }
}
