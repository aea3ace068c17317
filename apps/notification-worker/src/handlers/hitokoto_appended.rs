//! Mails submitters once their sentence enters the review queue.

use std::sync::Arc;

use amqp_worker::lapin::message::Delivery;
use amqp_worker::{DeliveryContext, DeliveryHandler};
use async_trait::async_trait;
use eyre::Result;
use mailer::{Mail, MailProvider, TemplateEngine};
use serde_json::json;
use tracing::{debug, info};

use crate::models::HitokotoAppendedMessage;

pub struct HitokotoAppendedHandler {
    provider: Arc<dyn MailProvider>,
    templates: Arc<TemplateEngine>,
}

impl HitokotoAppendedHandler {
    pub fn new(provider: Arc<dyn MailProvider>, templates: Arc<TemplateEngine>) -> Self {
        Self {
            provider,
            templates,
        }
    }

    async fn process(&self, message: HitokotoAppendedMessage) -> Result<()> {
        let html = self.templates.render(
            "hitokoto_appended",
            &json!({
                "username": message.creator,
                "created_at": message.created_at.to_string(),
                "hitokoto": message.hitokoto,
                "from": message.from,
                "from_who": message.from_who.as_deref().unwrap_or(""),
                "type": message.kind.label(),
            }),
        )?;

        let mail = Mail::new(&message.to, "喵！已经成功收到您提交的句子了！", html);
        self.provider.send(&mail).await?;
        info!(to = %message.to, uuid = %message.uuid, "Submission notice sent");
        Ok(())
    }
}

#[async_trait]
impl DeliveryHandler for HitokotoAppendedHandler {
    async fn handle(&self, _ctx: DeliveryContext, delivery: &Delivery) -> Result<()> {
        debug!(body = %String::from_utf8_lossy(&delivery.data), "Received sentence submission");
        let message = super::parse_payload(&delivery.data)?;
        self.process(message).await
    }
}
