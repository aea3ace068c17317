//! Tells a reviewer how a poll they voted in was settled.

use std::sync::Arc;

use amqp_worker::lapin::message::Delivery;
use amqp_worker::{DeliveryContext, DeliveryHandler};
use async_trait::async_trait;
use chrono::Local;
use eyre::{Result, WrapErr};
use mailer::{Mail, MailProvider, TemplateEngine};
use serde_json::json;
use tracing::{debug, info};

use crate::models::{PollFinishedMessage, Timestamp};

pub struct PollFinishedHandler {
    provider: Arc<dyn MailProvider>,
    templates: Arc<TemplateEngine>,
}

impl PollFinishedHandler {
    pub fn new(provider: Arc<dyn MailProvider>, templates: Arc<TemplateEngine>) -> Self {
        Self {
            provider,
            templates,
        }
    }

    async fn process(&self, message: PollFinishedMessage) -> Result<()> {
        let operated_at = Timestamp::parse(&message.updated_at)
            .wrap_err("Failed to parse the poll settle time")?;

        let html = self.templates.render(
            "poll_finished",
            &json!({
                "username": message.user_name,
                "poll_id": message.id,
                "operated_at": operated_at.to_string(),
                "hitokoto": message.hitokoto,
                "from": message.from,
                "from_who": message.from_who.as_deref().unwrap_or(""),
                "creator": message.creator,
                "type": message.kind.label(),
                "status": message.status.label(),
                "method": message.method.label(),
                "point": message.point.to_string(),
                "now": Local::now().format("%Y 年 %-m 月 %-d 日").to_string(),
            }),
        )?;

        let mail = Mail::new(&message.to, "喵！投票结果出炉了！", html);
        self.provider.send(&mail).await?;
        info!(
            to = %message.to,
            poll_id = message.id,
            status = message.status.label(),
            "Poll result sent"
        );
        Ok(())
    }
}

#[async_trait]
impl DeliveryHandler for PollFinishedHandler {
    async fn handle(&self, _ctx: DeliveryContext, delivery: &Delivery) -> Result<()> {
        debug!(body = %String::from_utf8_lossy(&delivery.data), "Received poll settlement");
        let message = super::parse_payload(&delivery.data)?;
        self.process(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailer::MockProvider;

    const FINISHED: &[u8] = r#"{
        "to": "reviewer@example.com",
        "uuid": "27d0f1b4-8c3e-4f5a-9b2d-6e7a8c9d0e1f",
        "hitokoto": "测试句子",
        "from": "某处",
        "type": "a",
        "creator": "某人",
        "id": 77,
        "updated_at": "1696318795",
        "user_name": "审核员甲",
        "created_at": "1696315195",
        "status": 200,
        "method": 1,
        "point": 2
    }"#
    .as_bytes();

    #[tokio::test]
    async fn sends_the_poll_result() {
        let mock = Arc::new(MockProvider::new());
        let handler =
            PollFinishedHandler::new(mock.clone(), Arc::new(TemplateEngine::new().unwrap()));

        let message = super::super::parse_payload(FINISHED).unwrap();
        handler.process(message).await.unwrap();

        let sent = mock.sent_mail().await;
        assert_eq!(sent[0].subject, "喵！投票结果出炉了！");
        assert!(sent[0].body.contains("#77"));
        assert!(sent[0].body.contains("入库"));
        assert!(sent[0].body.contains("赞同"));
        assert!(sent[0].body.contains("（2 票）"));
    }

    #[tokio::test]
    async fn unparseable_settle_time_errors_the_delivery() {
        let mock = Arc::new(MockProvider::new());
        let handler =
            PollFinishedHandler::new(mock.clone(), Arc::new(TemplateEngine::new().unwrap()));

        let raw = String::from_utf8_lossy(FINISHED)
            .replace("\"updated_at\": \"1696318795\"", "\"updated_at\": \"whenever\"");
        let message = super::super::parse_payload(raw.as_bytes()).unwrap();

        let err = handler.process(message).await.unwrap_err();
        assert!(err.to_string().contains("settle time"));
        assert_eq!(mock.sent_count().await, 0);
    }
}
