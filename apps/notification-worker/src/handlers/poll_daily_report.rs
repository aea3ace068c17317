//! Mails each reviewer their daily poll digest.

use std::sync::Arc;

use amqp_worker::lapin::message::Delivery;
use amqp_worker::{DeliveryContext, DeliveryHandler};
use async_trait::async_trait;
use eyre::Result;
use mailer::{Mail, MailProvider, TemplateEngine};
use serde_json::json;
use tracing::{debug, info};

use crate::models::PollDailyReportMessage;

pub struct PollDailyReportHandler {
    provider: Arc<dyn MailProvider>,
    templates: Arc<TemplateEngine>,
}

impl PollDailyReportHandler {
    pub fn new(provider: Arc<dyn MailProvider>, templates: Arc<TemplateEngine>) -> Self {
        Self {
            provider,
            templates,
        }
    }

    async fn process(&self, message: PollDailyReportMessage) -> Result<()> {
        let system = &message.system_information;
        let user = &message.user_information;

        let html = self.templates.render(
            "poll_daily_report",
            &json!({
                "username": message.user_name,
                "created_at": message.created_at.to_string(),
                "system": {
                    "total": system.total,
                    "processed": system.process_total,
                    "approved": system.process_accept,
                    "rejected": system.process_reject,
                    "need_modify": system.process_need_edited,
                },
                "user": {
                    "polled": {
                        "total": user.polled.total,
                        "approve": user.polled.accept,
                        "reject": user.polled.reject,
                        "need_modify": user.polled.need_edited,
                    },
                    "wait_for_polling": user.wait_for_polling,
                    "waiting_for_others": user.waiting,
                    "approved": user.accepted,
                    "rejected": user.rejected,
                    "need_modify": user.in_need_edited,
                },
            }),
        )?;

        let mail = Mail::new(&message.to, "喵！今日份的投票报告来了！", html);
        self.provider.send(&mail).await?;
        info!(to = %message.to, "Daily report sent");
        Ok(())
    }
}

#[async_trait]
impl DeliveryHandler for PollDailyReportHandler {
    async fn handle(&self, _ctx: DeliveryContext, delivery: &Delivery) -> Result<()> {
        debug!(body = %String::from_utf8_lossy(&delivery.data), "Received daily report");
        let message = super::parse_payload(&delivery.data)?;
        self.process(message).await
    }
}
