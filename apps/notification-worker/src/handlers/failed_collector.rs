//! Dead-letter retries.
//!
//! Every notification queue dead-letters rejected deliveries into the
//! collector queue. The collector reads the broker-written death
//! headers, waits out an exponential backoff and feeds the message back
//! to the queue it first died on. Messages that died too often are
//! wrapped and parked in a terminal queue for manual inspection.

use std::time::Duration;

use amqp_worker::lapin::message::Delivery;
use amqp_worker::lapin::types::{AMQPValue, FieldTable};
use amqp_worker::lapin::BasicProperties;
use amqp_worker::{
    DeliveryContext, DeliveryHandler, X_DEATH_COUNT_FIELD, X_DEATH_HEADER,
    X_FIRST_DEATH_EXCHANGE_HEADER, X_FIRST_DEATH_QUEUE_HEADER,
};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::topology::{FAILED_EXCHANGE, FAILED_TERMINAL_QUEUE, FAILED_TERMINAL_ROUTING_KEY};

/// Give up after five dead-letter rounds.
const MAX_DEATH_COUNT: i64 = 5;

pub struct FailedMessageCollector;

#[derive(Debug, PartialEq, Eq)]
enum RetryDecision {
    /// Wait, then hand the message back to its first-death queue.
    Requeue { delay: Duration },
    /// Too many deaths; park it in the terminal queue.
    Bury,
}

fn decide(count: i64) -> RetryDecision {
    if count <= MAX_DEATH_COUNT {
        RetryDecision::Requeue {
            delay: Duration::from_secs(4u64.saturating_pow(count.max(0) as u32)),
        }
    } else {
        RetryDecision::Bury
    }
}

/// Sums the broker-written death counts. The x-death header holds one
/// entry per (queue, reason) pair, each counting its own deaths.
fn death_count(headers: &FieldTable) -> Result<i64> {
    let deaths = headers
        .inner()
        .get(X_DEATH_HEADER)
        .and_then(AMQPValue::as_array)
        .ok_or_else(|| eyre!("{X_DEATH_HEADER} is missing"))?;

    let mut count = 0;
    for death in deaths.as_slice() {
        let Some(entry) = death.as_field_table() else {
            warn!(?death, "x-death entry is not a table, skipping");
            continue;
        };
        match entry.inner().get(X_DEATH_COUNT_FIELD).and_then(as_integer) {
            Some(value) => count += value,
            None => warn!("x-death entry carries no numeric count, skipping"),
        }
    }
    Ok(count)
}

fn as_integer(value: &AMQPValue) -> Option<i64> {
    match value {
        AMQPValue::LongLongInt(v) => Some(*v),
        AMQPValue::LongInt(v) => Some(i64::from(*v)),
        AMQPValue::LongUInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortUInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortShortInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortShortUInt(v) => Some(i64::from(*v)),
        _ => None,
    }
}

fn required_header(headers: &FieldTable, name: &str) -> Result<String> {
    headers
        .inner()
        .get(name)
        .and_then(AMQPValue::as_long_string)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .ok_or_else(|| eyre!("{name} is missing"))
}

/// Burial payload: the original headers plus the body as text, so the
/// terminal queue stays readable without AMQP tooling.
fn wrap_for_burial(headers: &FieldTable, body: &[u8]) -> Result<Vec<u8>> {
    serde_json::to_vec(&json!({
        "header": headers,
        "body": String::from_utf8_lossy(body),
    }))
    .wrap_err("Failed to wrap the dead letter")
}

fn persistent_with(headers: &FieldTable) -> BasicProperties {
    BasicProperties::default()
        .with_delivery_mode(2)
        .with_headers(headers.clone())
}

#[async_trait]
impl DeliveryHandler for FailedMessageCollector {
    async fn handle(&self, ctx: DeliveryContext, delivery: &Delivery) -> Result<()> {
        let headers = delivery
            .properties
            .headers()
            .as_ref()
            .ok_or_else(|| eyre!("{X_DEATH_HEADER} is missing"))?;

        let count = death_count(headers)?;
        let exchange = required_header(headers, X_FIRST_DEATH_EXCHANGE_HEADER)?;
        let queue = required_header(headers, X_FIRST_DEATH_QUEUE_HEADER)?;

        match decide(count) {
            RetryDecision::Requeue { delay } => {
                info!(
                    count,
                    delay_secs = delay.as_secs(),
                    exchange = %exchange,
                    queue = %queue,
                    "Waiting before the message goes back to its queue"
                );
                tokio::time::sleep(delay).await;
                let producer = ctx.producer(&exchange, &queue, "").await?;
                producer
                    .publish(persistent_with(headers), &delivery.data)
                    .await
                    .wrap_err_with(|| {
                        format!("publish original queue ({exchange}.{queue}) failed")
                    })?;
                debug!("Redelivery succeeded");
            }
            RetryDecision::Bury => {
                info!(
                    count,
                    exchange = %exchange,
                    queue = %queue,
                    "Too many deaths, parking the message in the terminal queue"
                );
                let producer = ctx
                    .producer(FAILED_EXCHANGE, FAILED_TERMINAL_QUEUE, FAILED_TERMINAL_ROUTING_KEY)
                    .await?;
                let body = wrap_for_burial(headers, &delivery.data)?;
                producer
                    .publish(persistent_with(headers), &body)
                    .await
                    .wrap_err("publish can queue failed")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amqp_worker::lapin::types::FieldArray;

    fn death_entry(count: i64) -> AMQPValue {
        let mut entry = FieldTable::default();
        entry.insert(X_DEATH_COUNT_FIELD.into(), AMQPValue::LongLongInt(count));
        AMQPValue::FieldTable(entry)
    }

    fn headers_with_deaths(entries: Vec<AMQPValue>) -> FieldTable {
        let mut headers = FieldTable::default();
        headers.insert(
            X_DEATH_HEADER.into(),
            AMQPValue::FieldArray(FieldArray::from(entries)),
        );
        headers
    }

    #[test]
    fn backoff_grows_by_powers_of_four() {
        assert_eq!(
            decide(0),
            RetryDecision::Requeue { delay: Duration::from_secs(1) }
        );
        assert_eq!(
            decide(1),
            RetryDecision::Requeue { delay: Duration::from_secs(4) }
        );
        assert_eq!(
            decide(5),
            RetryDecision::Requeue { delay: Duration::from_secs(1024) }
        );
    }

    #[test]
    fn sixth_death_is_buried() {
        assert_eq!(decide(6), RetryDecision::Bury);
        assert_eq!(decide(100), RetryDecision::Bury);
    }

    #[test]
    fn death_count_sums_all_entries() {
        let headers = headers_with_deaths(vec![death_entry(3), death_entry(2)]);
        assert_eq!(death_count(&headers).unwrap(), 5);
    }

    #[test]
    fn death_count_accepts_narrower_integers() {
        let mut entry = FieldTable::default();
        entry.insert(X_DEATH_COUNT_FIELD.into(), AMQPValue::LongInt(4));
        let headers = headers_with_deaths(vec![AMQPValue::FieldTable(entry)]);
        assert_eq!(death_count(&headers).unwrap(), 4);
    }

    #[test]
    fn death_count_skips_entries_without_a_count() {
        let headers = headers_with_deaths(vec![
            death_entry(2),
            AMQPValue::FieldTable(FieldTable::default()),
            AMQPValue::LongString("not a table".into()),
        ]);
        assert_eq!(death_count(&headers).unwrap(), 2);
    }

    #[test]
    fn missing_death_header_is_an_error() {
        let err = death_count(&FieldTable::default()).unwrap_err();
        assert_eq!(err.to_string(), "x-death is missing");
    }

    #[test]
    fn first_death_headers_are_required() {
        let mut headers = FieldTable::default();
        headers.insert(
            X_FIRST_DEATH_EXCHANGE_HEADER.into(),
            AMQPValue::LongString("notification".into()),
        );
        assert_eq!(
            required_header(&headers, X_FIRST_DEATH_EXCHANGE_HEADER).unwrap(),
            "notification"
        );
        let err = required_header(&headers, X_FIRST_DEATH_QUEUE_HEADER).unwrap_err();
        assert_eq!(err.to_string(), "x-first-death-queue is missing");
    }

    #[test]
    fn burial_wraps_headers_and_body_as_text() {
        let headers = headers_with_deaths(vec![death_entry(6)]);
        let wrapped = wrap_for_burial(&headers, "原始消息".as_bytes()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&wrapped).unwrap();
        assert_eq!(value["body"], "原始消息");
        assert!(value["header"].get("x-death").is_some());
    }
}
