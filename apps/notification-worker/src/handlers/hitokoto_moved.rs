//! Mails submitters when an admin re-reviews and moves their sentence.
//!
//! Rides the review template with its own variable block; the review
//! notice and this one never fill the same conditionals.

use std::sync::Arc;

use amqp_worker::lapin::message::Delivery;
use amqp_worker::{DeliveryContext, DeliveryHandler};
use async_trait::async_trait;
use eyre::Result;
use mailer::{Mail, MailProvider, TemplateEngine};
use serde_json::json;
use tracing::{debug, info};

use crate::models::HitokotoMovedMessage;

pub struct HitokotoMovedHandler {
    provider: Arc<dyn MailProvider>,
    templates: Arc<TemplateEngine>,
}

impl HitokotoMovedHandler {
    pub fn new(provider: Arc<dyn MailProvider>, templates: Arc<TemplateEngine>) -> Self {
        Self {
            provider,
            templates,
        }
    }

    async fn process(&self, message: HitokotoMovedMessage) -> Result<()> {
        // Admin moves only ever approve or reject.
        let operate = if message.operate.is_approved() {
            "通过"
        } else {
            "驳回"
        };

        let html = self.templates.render(
            "hitokoto_reviewed",
            &json!({
                "username": message.creator,
                "created_at": message.created_at.to_string(),
                "hitokoto": message.hitokoto,
                "from_who": message.from_who.as_deref().unwrap_or(""),
                "from": message.from,
                "type": message.kind.label(),
                "operate": operate,
                "operator_username": message.operator_username,
                "operator_uid": message.operator_uid,
                "operated_at": message.operated_at.to_string(),
            }),
        )?;

        let mail = Mail::new(&message.to, "喵！您的句子已重新审核！", html);
        self.provider.send(&mail).await?;
        info!(to = %message.to, uuid = %message.uuid, operate, "Re-review notice sent");
        Ok(())
    }
}

#[async_trait]
impl DeliveryHandler for HitokotoMovedHandler {
    async fn handle(&self, _ctx: DeliveryContext, delivery: &Delivery) -> Result<()> {
        debug!(body = %String::from_utf8_lossy(&delivery.data), "Received sentence move");
        let message = super::parse_payload(&delivery.data)?;
        self.process(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailer::MockProvider;

    const MOVED: &[u8] = r#"{
        "to": "creator@example.com",
        "uuid": "27d0f1b4-8c3e-4f5a-9b2d-6e7a8c9d0e1f",
        "hitokoto": "测试句子",
        "from": "某处",
        "type": "a",
        "creator": "某人",
        "created_at": "1696315195",
        "operated_at": "1696318795",
        "operator_username": "管理员",
        "operator_uid": 7,
        "operate": 200
    }"#
    .as_bytes();

    #[tokio::test]
    async fn renders_the_move_as_an_approval() {
        let mock = Arc::new(MockProvider::new());
        let handler =
            HitokotoMovedHandler::new(mock.clone(), Arc::new(TemplateEngine::new().unwrap()));

        let message = super::super::parse_payload(MOVED).unwrap();
        handler.process(message).await.unwrap();

        let sent = mock.sent_mail().await;
        assert_eq!(sent[0].subject, "喵！您的句子已重新审核！");
        assert!(sent[0].body.contains("重新审核"));
        assert!(sent[0].body.contains("通过"));
        assert!(sent[0].body.contains("管理员"));
        // The plain review block stays empty.
        assert!(!sent[0].body.contains("审核结果为"));
    }

    #[tokio::test]
    async fn any_other_verdict_reads_as_a_rejection() {
        let mock = Arc::new(MockProvider::new());
        let handler =
            HitokotoMovedHandler::new(mock.clone(), Arc::new(TemplateEngine::new().unwrap()));

        let raw = String::from_utf8_lossy(MOVED).replace("\"operate\": 200", "\"operate\": 201");
        let message = super::super::parse_payload(raw.as_bytes()).unwrap();
        handler.process(message).await.unwrap();

        assert!(mock.sent_mail().await[0].body.contains("驳回"));
    }
}
