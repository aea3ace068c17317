//! Topology value objects: exchanges, queues, bindings and the options a
//! consumer or producer is configured with.
//!
//! These are plain data carriers; declaration happens on the consumer's
//! channel and producers assume the topology already exists.

use lapin::types::{AMQPValue, FieldTable};
use lapin::ExchangeKind;

/// Header carrying the broker-maintained death records of a delivery.
pub const X_DEATH_HEADER: &str = "x-death";
/// Field inside an x-death record carrying the death count.
pub const X_DEATH_COUNT_FIELD: &str = "count";
/// Header naming the exchange a delivery first dead-lettered from.
pub const X_FIRST_DEATH_EXCHANGE_HEADER: &str = "x-first-death-exchange";
/// Header naming the queue a delivery first dead-lettered from.
pub const X_FIRST_DEATH_QUEUE_HEADER: &str = "x-first-death-queue";
/// Queue argument routing rejected deliveries to a dead-letter exchange.
pub const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";
/// Queue argument overriding the routing key used when dead-lettering.
pub const DEAD_LETTER_ROUTING_KEY_ARG: &str = "x-dead-letter-routing-key";

/// An exchange to declare and publish through.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
    pub args: FieldTable,
}

impl Default for Exchange {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: ExchangeKind::Direct,
            durable: false,
            auto_delete: false,
            internal: false,
            no_wait: false,
            args: FieldTable::default(),
        }
    }
}

impl Exchange {
    /// A durable direct exchange, the shape every notification route uses.
    pub fn durable_direct(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Direct,
            durable: true,
            ..Self::default()
        }
    }
}

/// A queue to declare and consume from.
#[derive(Debug, Clone, Default)]
pub struct Queue {
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    pub args: FieldTable,
}

impl Queue {
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            ..Self::default()
        }
    }

    /// Same as [`Queue::durable`] with dead-letter routing attached.
    pub fn durable_with_dead_letter(
        name: impl Into<String>,
        dead_letter_exchange: &str,
        dead_letter_routing_key: &str,
    ) -> Self {
        Self {
            name: name.into(),
            durable: true,
            args: dead_letter_args(dead_letter_exchange, dead_letter_routing_key),
            ..Self::default()
        }
    }
}

/// Builds the queue argument table routing rejected deliveries to a
/// dead-letter exchange.
pub fn dead_letter_args(exchange: &str, routing_key: &str) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        DEAD_LETTER_EXCHANGE_ARG.into(),
        AMQPValue::LongString(exchange.into()),
    );
    args.insert(
        DEAD_LETTER_ROUTING_KEY_ARG.into(),
        AMQPValue::LongString(routing_key.into()),
    );
    args
}

/// A queue-to-exchange binding.
#[derive(Debug, Clone, Default)]
pub struct Binding {
    pub routing_key: String,
    pub no_wait: bool,
    pub args: FieldTable,
}

impl Binding {
    pub fn new(routing_key: impl Into<String>) -> Self {
        Self {
            routing_key: routing_key.into(),
            ..Self::default()
        }
    }
}

/// Flags and identity a consumer registers with.
///
/// When `auto_ack` is set the broker settles deliveries on send, so
/// `ack_by_error` has no effect.
#[derive(Debug, Clone, Default)]
pub struct ConsumerOptions {
    pub tag: String,
    pub auto_ack: bool,
    pub exclusive: bool,
    pub no_local: bool,
    pub no_wait: bool,
    pub args: FieldTable,
    /// Settle manually: ack on handler success, nack (without requeue) on
    /// handler error. With this unset a manual-ack consumer never settles.
    pub ack_by_error: bool,
}

impl ConsumerOptions {
    pub fn manual(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ack_by_error: true,
            ..Self::default()
        }
    }
}

/// Identity and flags a producer publishes with.
#[derive(Debug, Clone, Default)]
pub struct PublishingOptions {
    pub tag: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
}

/// The complete topology one consumer or producer owns for its lifetime:
/// one exchange, one queue, the binding between them, and the options of
/// whichever side this session drives.
#[derive(Debug, Clone)]
pub struct Session {
    pub exchange: Exchange,
    pub queue: Queue,
    pub binding: Binding,
    pub consumer: Option<ConsumerOptions>,
    pub publishing: Option<PublishingOptions>,
}

impl Session {
    pub fn consuming(exchange: Exchange, queue: Queue, binding: Binding, options: ConsumerOptions) -> Self {
        Self {
            exchange,
            queue,
            binding,
            consumer: Some(options),
            publishing: None,
        }
    }

    pub fn publishing(exchange: Exchange, queue: Queue, options: PublishingOptions) -> Self {
        Self {
            exchange,
            queue,
            binding: Binding::default(),
            consumer: None,
            publishing: Some(options),
        }
    }

    /// A publishing session over a durable direct exchange and durable
    /// queue, the shape the delivery context resolves producers with.
    pub fn direct(exchange: &str, queue: &str, routing_key: &str) -> Self {
        Self::publishing(
            Exchange::durable_direct(exchange),
            Queue::durable(queue),
            PublishingOptions {
                routing_key: routing_key.to_owned(),
                ..PublishingOptions::default()
            },
        )
    }

    /// The routing key publishes from this session use.
    ///
    /// An empty exchange name means the broker's default exchange, which
    /// routes by queue name regardless of any configured key.
    pub fn routing_key(&self) -> String {
        if self.exchange.name.is_empty() {
            return self.queue.name.clone();
        }
        self.publishing
            .as_ref()
            .map(|po| po.routing_key.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_key_prefers_the_configured_key() {
        let session = Session::direct("notification", "hitokoto_appended", "notification.hitokoto_appended");
        assert_eq!(session.routing_key(), "notification.hitokoto_appended");
    }

    #[test]
    fn routing_key_falls_back_to_queue_name_on_default_exchange() {
        let mut session = Session::direct("", "hitokoto_appended", "some.configured.key");
        session.exchange.name.clear();
        assert_eq!(session.routing_key(), "hitokoto_appended");
    }

    #[test]
    fn routing_key_is_empty_when_unset_on_a_named_exchange() {
        let session = Session::direct("notification", "hitokoto_appended", "");
        assert_eq!(session.routing_key(), "");
    }

    #[test]
    fn dead_letter_args_carry_exchange_and_routing_key() {
        let args = dead_letter_args("notification_failed", "notification_failed.notification_failed_collector");
        let inner = args.inner();

        let exchange = inner
            .get(DEAD_LETTER_EXCHANGE_ARG)
            .and_then(|v| v.as_long_string())
            .map(|s| String::from_utf8_lossy(s.as_bytes()).into_owned());
        assert_eq!(exchange.as_deref(), Some("notification_failed"));

        let key = inner
            .get(DEAD_LETTER_ROUTING_KEY_ARG)
            .and_then(|v| v.as_long_string())
            .map(|s| String::from_utf8_lossy(s.as_bytes()).into_owned());
        assert_eq!(
            key.as_deref(),
            Some("notification_failed.notification_failed_collector")
        );
    }

    #[test]
    fn manual_consumer_options_settle_by_error() {
        let options = ConsumerOptions::manual("HitokotoAppendedNotificationWorker");
        assert!(options.ack_by_error);
        assert!(!options.auto_ack);
        assert_eq!(options.tag, "HitokotoAppendedNotificationWorker");
    }
}
