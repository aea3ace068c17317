//! Notification Worker Service
//!
//! A background worker that turns queue messages into notification mails.
//!
//! ## Architecture
//!
//! ```text
//! RabbitMQ (exchange: notification)
//!   ↓ (six queues, one per notification kind)
//! DeliveryHandler (decode + validate + render)
//!   ↓
//! MailProvider (SMTP)
//!
//! rejected deliveries
//!   ↓ (dead-letter exchange: notification_failed)
//! FailedMessageCollector (backoff + redeliver, park after five deaths)
//! ```
//!
//! ## Features
//!
//! - Self-healing AMQP connection with bounded redial
//! - Payload validation before any mail is rendered
//! - Exponential retry through the broker's dead-letter loop
//! - Graceful shutdown handling

use std::sync::Arc;

use amqp_worker::{ConsumerConfig, DeliveryHandler, Instance};
use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::{Environment, FromEnv};
use eyre::{Result, WrapErr};
use mailer::{provider_from_config, MailProvider, TemplateEngine};
use tokio::signal;
use tracing::{error, info};

use crate::handlers::{
    FailedMessageCollector, HitokotoAppendedHandler, HitokotoMovedHandler,
    HitokotoReviewedHandler, PollCreatedHandler, PollDailyReportHandler, PollFinishedHandler,
};

mod config;
pub mod handlers;
pub mod models;
pub mod topology;

pub use config::Settings;

/// Run the notification worker
///
/// This is the main entry point for the worker. It:
/// 1. Sets up structured logging (env-aware: JSON for prod, pretty for dev)
/// 2. Loads the broker and mail settings from the environment
/// 3. Connects to RabbitMQ and registers the seven consumers
/// 4. Waits for a shutdown signal, then drains and closes
///
/// # Errors
///
/// Returns an error if:
/// - The settings are invalid
/// - The broker stays unreachable past the redial budget
/// - A consumer fails to subscribe
/// - Shutdown leaves the broker connection in error
pub async fn run() -> Result<()> {
    install_color_eyre();
    let environment = Environment::from_env();
    init_tracing(&environment);

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        "Starting notification worker"
    );
    info!("Environment: {:?}", environment);

    let settings = Settings::from_env().wrap_err("Failed to load worker settings")?;

    let provider = provider_from_config(&settings.mail_driver)?;
    info!(driver = provider.name(), "Mail provider ready");
    let templates = Arc::new(TemplateEngine::new()?);

    let instance = Instance::init(&settings.amqp)
        .await
        .wrap_err("Failed to reach the AMQP broker")?;
    register_consumers(&instance, &settings, &provider, &templates);
    instance
        .subscribe_consumers()
        .await
        .wrap_err("Failed to start the queue consumers")?;
    info!("Consumers are live, processing notifications");

    shutdown_signal().await?;
    info!("Shutting down...");

    let shutdown_result = instance.shutdown().await;
    instance
        .on_close(|error| match error {
            Some(details) => error!(error = details, "Worker closed after a shutdown failure"),
            None => info!("Worker closed cleanly"),
        })
        .await;
    shutdown_result?;

    Ok(())
}

/// One consumer per notification queue, plus the dead-letter collector.
fn register_consumers(
    instance: &Instance,
    settings: &Settings,
    provider: &Arc<dyn MailProvider>,
    templates: &Arc<TemplateEngine>,
) {
    let handlers: [(&str, &str, Arc<dyn DeliveryHandler>); 6] = [
        (
            "hitokoto_appended",
            "HitokotoAppendedNotificationWorker",
            Arc::new(HitokotoAppendedHandler::new(provider.clone(), templates.clone())),
        ),
        (
            "hitokoto_moved",
            "HitokotoMovedNotificationWorker",
            Arc::new(HitokotoMovedHandler::new(provider.clone(), templates.clone())),
        ),
        (
            "hitokoto_reviewed",
            "HitokotoReviewedNotificationWorker",
            Arc::new(HitokotoReviewedHandler::new(provider.clone(), templates.clone())),
        ),
        (
            "hitokoto_poll_created",
            "HitokotoPollCreatedNotificationWorker",
            Arc::new(PollCreatedHandler::new(provider.clone(), templates.clone())),
        ),
        (
            "hitokoto_poll_finished",
            "HitokotoPollFinishedNotificationWorker",
            Arc::new(PollFinishedHandler::new(provider.clone(), templates.clone())),
        ),
        (
            "hitokoto_poll_daily_report",
            "HitokotoPollDailyReportNotificationWorker",
            Arc::new(PollDailyReportHandler::new(provider.clone(), templates.clone())),
        ),
    ];

    for (queue, tag, handler) in handlers {
        let mut consumer = ConsumerConfig::new(topology::notification_session(queue, tag), handler);
        if let Some(prefetch) = settings.prefetch {
            consumer = consumer.with_prefetch(prefetch);
        }
        instance.register_consumer_config(consumer);
    }

    // The collector sleeps through its backoff while holding the
    // delivery, so it keeps the broker-default prefetch.
    instance.register_consumer_config(ConsumerConfig::new(
        topology::collector_session(),
        Arc::new(FailedMessageCollector),
    ));
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
