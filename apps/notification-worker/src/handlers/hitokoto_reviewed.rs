//! Mails submitters the review verdict for their sentence.

use std::sync::Arc;

use amqp_worker::lapin::message::Delivery;
use amqp_worker::{DeliveryContext, DeliveryHandler};
use async_trait::async_trait;
use eyre::Result;
use mailer::{Mail, MailProvider, TemplateEngine};
use serde_json::json;
use tracing::{debug, info};

use crate::models::HitokotoReviewedMessage;

pub struct HitokotoReviewedHandler {
    provider: Arc<dyn MailProvider>,
    templates: Arc<TemplateEngine>,
}

impl HitokotoReviewedHandler {
    pub fn new(provider: Arc<dyn MailProvider>, templates: Arc<TemplateEngine>) -> Self {
        Self {
            provider,
            templates,
        }
    }

    async fn process(&self, message: HitokotoReviewedMessage) -> Result<()> {
        let html = self.templates.render(
            "hitokoto_reviewed",
            &json!({
                "username": message.creator,
                "created_at": message.created_at.to_string(),
                "hitokoto": message.hitokoto,
                "from_who": message.from_who.as_deref().unwrap_or(""),
                "from": message.from,
                "type": message.kind.label(),
                "reviewer": message.reviewer_name,
                "reviewer_uid": message.reviewer_uid,
                "reviewed_at": message.operated_at.to_string(),
                "review_result": message.status.label(),
            }),
        )?;

        let mail = Mail::new(&message.to, "喵！您的句子审核结果出来了！", html);
        self.provider.send(&mail).await?;
        info!(
            to = %message.to,
            uuid = %message.uuid,
            result = message.status.label(),
            "Review notice sent"
        );
        Ok(())
    }
}

#[async_trait]
impl DeliveryHandler for HitokotoReviewedHandler {
    async fn handle(&self, _ctx: DeliveryContext, delivery: &Delivery) -> Result<()> {
        debug!(body = %String::from_utf8_lossy(&delivery.data), "Received review verdict");
        let message = super::parse_payload(&delivery.data)?;
        self.process(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailer::MockProvider;

    #[tokio::test]
    async fn sends_the_review_verdict() {
        let mock = Arc::new(MockProvider::new());
        let handler =
            HitokotoReviewedHandler::new(mock.clone(), Arc::new(TemplateEngine::new().unwrap()));

        let message: HitokotoReviewedMessage = super::super::parse_payload(
            r#"{
                "to": "creator@example.com",
                "uuid": "27d0f1b4-8c3e-4f5a-9b2d-6e7a8c9d0e1f",
                "hitokoto": "测试句子",
                "from": "某处",
                "type": "i",
                "from_who": "无名氏",
                "creator": "某人",
                "created_at": "1696315195",
                "operated_at": "1696318795",
                "reviewer_name": "审核员甲",
                "reviewer_uid": 42,
                "status": 200
            }"#
            .as_bytes(),
        )
        .unwrap();

        handler.process(message).await.unwrap();

        let sent = mock.sent_mail().await;
        assert_eq!(sent[0].to, "creator@example.com");
        assert_eq!(sent[0].subject, "喵！您的句子审核结果出来了！");
        assert!(sent[0].body.contains("审核结果为"));
        assert!(sent[0].body.contains("入库"));
        assert!(sent[0].body.contains("审核员甲"));
        assert!(sent[0].body.contains("Poetry - 古诗词"));
        assert!(!sent[0].body.contains("重新审核"));
    }
}
