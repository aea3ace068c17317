//! SMTP mail provider using lettre

use super::{MailProvider, SendResult};
use crate::models::Mail;
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;

/// SMTP provider configuration
#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
    pub use_tls: bool,
}

/// SMTP mail provider
#[derive(Debug)]
pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: Arc<SmtpConfig>,
}

impl SmtpProvider {
    /// Create a new SMTP provider
    pub fn new(config: SmtpConfig) -> Result<Self> {
        let transport = if config.use_tls {
            let creds = Credentials::new(config.username.clone(), config.password.clone());
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .wrap_err("Failed to create SMTP relay")?
                .credentials(creds)
                .port(config.port)
                .build()
        } else if !config.username.is_empty() {
            let creds = Credentials::new(config.username.clone(), config.password.clone());
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .credentials(creds)
                .port(config.port)
                .build()
        } else {
            // No auth (for Mailpit/Mailhog)
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .build()
        };

        Ok(Self {
            transport,
            config: Arc::new(config),
        })
    }

    /// Create a provider from environment variables
    pub fn from_env() -> Result<Self> {
        let config = SmtpConfig {
            host: std::env::var("SMTP_HOST").wrap_err("SMTP_HOST not set")?,
            port: std::env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()
                .wrap_err("Invalid SMTP_PORT")?,
            username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
            password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
            from_email: std::env::var("MAIL_FROM_ADDRESS")
                .or_else(|_| std::env::var("SMTP_FROM_EMAIL"))
                .wrap_err("MAIL_FROM_ADDRESS not set")?,
            from_name: std::env::var("MAIL_FROM_NAME").unwrap_or_else(|_| "一言".to_string()),
            use_tls: std::env::var("SMTP_USE_TLS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        };

        Self::new(config)
    }

    fn build_message(&self, mail: &Mail) -> Result<Message> {
        let from: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .wrap_err("Invalid from address")?;

        let to: Mailbox = mail.to.parse().wrap_err("Invalid to address")?;

        let mut builder = Message::builder().from(from).to(to).subject(&mail.subject);

        for cc in &mail.cc {
            let cc_mailbox: Mailbox = cc.parse().wrap_err("Invalid CC address")?;
            builder = builder.cc(cc_mailbox);
        }

        for bcc in &mail.bcc {
            let bcc_mailbox: Mailbox = bcc.parse().wrap_err("Invalid BCC address")?;
            builder = builder.bcc(bcc_mailbox);
        }

        builder
            .header(ContentType::TEXT_HTML)
            .body(mail.body.clone())
            .wrap_err("Failed to build HTML message")
    }
}

#[async_trait]
impl MailProvider for SmtpProvider {
    async fn send(&self, mail: &Mail) -> Result<SendResult> {
        let message = self.build_message(mail)?;

        let response = self
            .transport
            .send(message)
            .await
            .wrap_err("Failed to send mail via SMTP")?;

        let message_id = response
            .message()
            .next()
            .map(|s| s.to_string())
            .unwrap_or_else(|| mail.id.clone());

        tracing::info!(
            mail_id = %mail.id,
            to = %mail.to,
            subject = %mail.subject,
            "Mail sent successfully"
        );

        Ok(SendResult { message_id })
    }

    async fn health_check(&self) -> Result<()> {
        self.transport
            .test_connection()
            .await
            .wrap_err("SMTP health check failed")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}
