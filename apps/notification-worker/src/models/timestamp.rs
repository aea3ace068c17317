//! Flexible timestamp decoding for notification payloads.
//!
//! Older producers ship epoch strings (seconds through nanoseconds,
//! told apart by digit count), newer ones ship ISO 8601 text. Mails
//! print the moment in the worker's local time.

use std::fmt;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use serde::de::{self, Deserialize, Deserializer};

#[derive(Debug, thiserror::Error)]
pub enum TimestampError {
    /// Digit-only input whose length maps to no known epoch precision.
    #[error("invalid timestamp length")]
    InvalidLength,
    #[error("invalid timestamp: {0}")]
    Unparseable(String),
    #[error("timestamp out of range")]
    OutOfRange,
}

/// A moment in time decoded from a notification payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp(DateTime<Local>);

impl Timestamp {
    /// Decodes an epoch string or an ISO 8601 / `Y-m-d H:i:s` string.
    pub fn parse(raw: &str) -> Result<Self, TimestampError> {
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            return Self::from_epoch_digits(raw);
        }
        Self::from_text(raw)
    }

    pub fn date_time(&self) -> DateTime<Local> {
        self.0
    }

    pub fn format(&self, pattern: &str) -> String {
        self.0.format(pattern).to_string()
    }

    fn from_epoch_digits(raw: &str) -> Result<Self, TimestampError> {
        // Producers disagree on precision; the digit count decides.
        let scale = match raw.len() {
            10 => EpochScale::Seconds,
            13 => EpochScale::Millis,
            16 => EpochScale::Micros,
            19 => EpochScale::Nanos,
            _ => return Err(TimestampError::InvalidLength),
        };
        let value: i64 = raw
            .parse()
            .map_err(|_| TimestampError::Unparseable(raw.to_string()))?;
        let (secs, nanos) = match scale {
            EpochScale::Seconds => (value, 0),
            EpochScale::Millis => (value / 1_000, (value % 1_000) * 1_000_000),
            EpochScale::Micros => (value / 1_000_000, (value % 1_000_000) * 1_000),
            EpochScale::Nanos => (value / 1_000_000_000, value % 1_000_000_000),
        };
        let utc = DateTime::from_timestamp(secs, nanos as u32).ok_or(TimestampError::OutOfRange)?;
        Ok(Self(utc.with_timezone(&Local)))
    }

    fn from_text(raw: &str) -> Result<Self, TimestampError> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Self(parsed.with_timezone(&Local)));
        }
        for pattern in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, pattern) {
                return Self::from_naive(naive, raw);
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Self::from_naive(naive, raw);
            }
        }
        Err(TimestampError::Unparseable(raw.to_string()))
    }

    fn from_naive(naive: NaiveDateTime, raw: &str) -> Result<Self, TimestampError> {
        Local
            .from_local_datetime(&naive)
            .single()
            .map(Self)
            .ok_or_else(|| TimestampError::Unparseable(raw.to_string()))
    }
}

impl fmt::Display for Timestamp {
    /// The `Y-m-d H:i:s` form the mail templates expect.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S"))
    }
}

enum EpochScale {
    Seconds,
    Millis,
    Micros,
    Nanos,
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Timestamp::parse(&raw).map_err(de::Error::custom)
    }
}
