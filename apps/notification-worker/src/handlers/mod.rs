//! Queue consumers, one per notification queue plus the dead-letter
//! collector.
//!
//! The mail handlers share one shape: decode and validate the payload,
//! render the template, hand the mail to the provider. Any error along
//! the way fails the delivery and sends it down the dead-letter
//! pipeline.

mod failed_collector;
mod hitokoto_appended;
mod hitokoto_moved;
mod hitokoto_reviewed;
mod poll_created;
mod poll_daily_report;
mod poll_finished;

pub use failed_collector::FailedMessageCollector;
pub use hitokoto_appended::HitokotoAppendedHandler;
pub use hitokoto_moved::HitokotoMovedHandler;
pub use hitokoto_reviewed::HitokotoReviewedHandler;
pub use poll_created::PollCreatedHandler;
pub use poll_daily_report::PollDailyReportHandler;
pub use poll_finished::PollFinishedHandler;

use eyre::{Result, WrapErr};
use serde::de::DeserializeOwned;
use validator::Validate;

/// Decodes a payload and runs its validation rules.
pub(crate) fn parse_payload<T>(data: &[u8]) -> Result<T>
where
    T: DeserializeOwned + Validate,
{
    let message: T =
        serde_json::from_slice(data).wrap_err("Failed to decode notification payload")?;
    message
        .validate()
        .wrap_err("Notification payload failed validation")?;
    Ok(message)
}
