//! Payload models for the notification queues.

mod envelopes;
mod labels;
mod timestamp;

pub use envelopes::{
    HitokotoAppendedMessage, HitokotoMovedMessage, HitokotoReviewedMessage, PollCreatedMessage,
    PollDailyReportMessage, PollFinishedMessage, PolledCounts, SystemInformation, UserInformation,
};
pub use labels::{HitokotoType, PollMethod, PollStatus};
pub use timestamp::{Timestamp, TimestampError};
