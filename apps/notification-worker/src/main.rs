//! Notification Worker - Entry Point
//!
//! Background worker that turns queue events from the hitokoto services
//! into mail notifications.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    notification_worker::run().await
}
