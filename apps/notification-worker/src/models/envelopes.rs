//! Notification payloads published by the hitokoto services.
//!
//! Every payload is checked with `validator` before a mail goes out;
//! a payload that fails either decoding or validation errors the
//! delivery and rides the dead-letter pipeline.

use serde::Deserialize;
use validator::{Validate, ValidationError};

use super::labels::{HitokotoType, PollMethod, PollStatus};
use super::timestamp::Timestamp;

/// Sentence UUIDs are always version 4.
fn validate_uuid4(value: &str) -> Result<(), ValidationError> {
    match uuid::Uuid::parse_str(value) {
        Ok(parsed) if parsed.get_version_num() == 4 => Ok(()),
        _ => Err(ValidationError::new("uuid4")),
    }
}

fn validate_hitokoto_type(value: &HitokotoType) -> Result<(), ValidationError> {
    if value.is_known() {
        Ok(())
    } else {
        Err(ValidationError::new("hitokoto_type"))
    }
}

/// A sentence entered the review queue.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct HitokotoAppendedMessage {
    #[validate(email)]
    pub to: String,
    #[validate(custom(function = "validate_uuid4"))]
    pub uuid: String,
    #[validate(length(min = 1))]
    pub hitokoto: String,
    #[validate(length(min = 1))]
    pub from: String,
    #[serde(rename = "type")]
    #[validate(custom(function = "validate_hitokoto_type"))]
    pub kind: HitokotoType,
    pub from_who: Option<String>,
    #[validate(length(min = 1))]
    pub creator: String,
    /// Submit time of the sentence.
    pub created_at: Timestamp,
}

/// An admin re-reviewed a sentence and moved it.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct HitokotoMovedMessage {
    #[validate(email)]
    pub to: String,
    #[validate(custom(function = "validate_uuid4"))]
    pub uuid: String,
    #[validate(length(min = 1))]
    pub hitokoto: String,
    #[validate(length(min = 1))]
    pub from: String,
    #[serde(rename = "type")]
    #[validate(custom(function = "validate_hitokoto_type"))]
    pub kind: HitokotoType,
    pub from_who: Option<String>,
    #[validate(length(min = 1))]
    pub creator: String,
    pub created_at: Timestamp,
    pub operated_at: Timestamp,
    #[validate(length(min = 1))]
    pub operator_username: String,
    #[validate(range(min = 1))]
    pub operator_uid: u64,
    /// 200 approves, anything else rejects.
    #[serde(default)]
    pub operate: PollStatus,
}

/// A sentence finished review.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct HitokotoReviewedMessage {
    #[validate(email)]
    pub to: String,
    #[validate(custom(function = "validate_uuid4"))]
    pub uuid: String,
    #[validate(length(min = 1))]
    pub hitokoto: String,
    #[validate(length(min = 1))]
    pub from: String,
    #[serde(rename = "type")]
    #[validate(custom(function = "validate_hitokoto_type"))]
    pub kind: HitokotoType,
    pub from_who: Option<String>,
    #[validate(length(min = 1))]
    pub creator: String,
    pub created_at: Timestamp,
    pub operated_at: Timestamp,
    #[validate(length(min = 1))]
    pub reviewer_name: String,
    #[validate(range(min = 1))]
    pub reviewer_uid: i64,
    /// 200 approved, 201 rejected.
    #[serde(default)]
    pub status: PollStatus,
}

/// A new poll opened for a sentence.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PollCreatedMessage {
    #[validate(email)]
    pub to: String,
    #[validate(custom(function = "validate_uuid4"))]
    pub uuid: String,
    #[validate(length(min = 1))]
    pub hitokoto: String,
    #[validate(length(min = 1))]
    pub from: String,
    #[serde(rename = "type")]
    #[validate(custom(function = "validate_hitokoto_type"))]
    pub kind: HitokotoType,
    pub from_who: Option<String>,
    #[validate(length(min = 1))]
    pub creator: String,
    #[validate(length(min = 1))]
    pub user_name: String,
    #[validate(range(min = 1))]
    pub id: u64,
    /// Poll creation time, not the sentence submit time.
    pub created_at: Timestamp,
}

/// A poll the recipient voted in was settled.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PollFinishedMessage {
    #[validate(email)]
    pub to: String,
    #[validate(custom(function = "validate_uuid4"))]
    pub uuid: String,
    #[validate(length(min = 1))]
    pub hitokoto: String,
    #[validate(length(min = 1))]
    pub from: String,
    #[serde(rename = "type")]
    #[validate(custom(function = "validate_hitokoto_type"))]
    pub kind: HitokotoType,
    pub from_who: Option<String>,
    #[validate(length(min = 1))]
    pub creator: String,
    #[serde(default)]
    pub id: i64,
    /// Settle time, raw text parsed at render time.
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub status: PollStatus,
    #[serde(default)]
    pub method: PollMethod,
    /// Votes the reviewer spent.
    #[serde(default)]
    pub point: i64,
}

/// Daily digest for one reviewer.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PollDailyReportMessage {
    /// Report generation time.
    pub created_at: Timestamp,
    #[validate(email)]
    pub to: String,
    #[validate(length(min = 1))]
    pub user_name: String,
    pub system_information: SystemInformation,
    pub user_information: UserInformation,
}

/// Platform-wide counters over the past 24 hours.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemInformation {
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub process_total: i64,
    #[serde(default)]
    pub process_accept: i64,
    #[serde(default)]
    pub process_reject: i64,
    #[serde(default)]
    pub process_need_edited: i64,
}

/// Per-reviewer counters over the past 24 hours.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInformation {
    #[serde(default)]
    pub polled: PolledCounts,
    #[serde(default)]
    pub waiting: i64,
    #[serde(default)]
    pub accepted: i64,
    #[serde(default)]
    pub rejected: i64,
    #[serde(default)]
    pub in_need_edited: i64,
    #[serde(default)]
    pub wait_for_polling: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolledCounts {
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub accept: i64,
    #[serde(default)]
    pub reject: i64,
    #[serde(default)]
    pub need_edited: i64,
}
