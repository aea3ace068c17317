//! Mail dispatch for the notification worker.
//!
//! ## Components
//!
//! - **Models**: `Mail`, the single message shape every provider accepts
//! - **Providers**: SMTP via lettre, and a Mock provider for tests,
//!   selected once at startup by `provider_from_config`
//! - **Templates**: Handlebars-based `TemplateEngine` pre-loaded with the
//!   notification mail bodies (Chinese, HTML)

pub mod models;
pub mod provider;
pub mod templates;

pub use models::Mail;
pub use provider::{provider_from_config, MailProvider, MockProvider, SendResult};
pub use provider::{SmtpConfig, SmtpProvider};
pub use templates::TemplateEngine;
