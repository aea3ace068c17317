//! Names and sessions of the notification wire contract.
//!
//! Every queue here is declared by its consumer on startup and again
//! after a channel recovery. Producers never declare anything, so the
//! terminal queue below has to exist before the first burial.

use amqp_worker::{Binding, ConsumerOptions, Exchange, Queue, Session};

/// Exchange the hitokoto services publish notification events to.
pub const NOTIFICATION_EXCHANGE: &str = "notification";

/// Exchange rejected deliveries are dead-lettered to.
pub const FAILED_EXCHANGE: &str = "notification_failed";

/// Queue feeding the retry collector.
pub const FAILED_COLLECTOR_QUEUE: &str = "notification_failed_collector";

pub const FAILED_COLLECTOR_ROUTING_KEY: &str = "notification_failed.notification_failed_collector";

/// Parking lot for messages that died too often. Declared out of band.
pub const FAILED_TERMINAL_QUEUE: &str = "notification_failed_can";

pub const FAILED_TERMINAL_ROUTING_KEY: &str = "notification_failed.notification_failed_can";

/// Consuming session for one notification queue: durable direct
/// exchange, durable queue dead-lettering into the collector, binding
/// `notification.<queue>`.
pub fn notification_session(queue: &str, tag: &str) -> Session {
    Session::consuming(
        Exchange::durable_direct(NOTIFICATION_EXCHANGE),
        Queue::durable_with_dead_letter(queue, FAILED_EXCHANGE, FAILED_COLLECTOR_ROUTING_KEY),
        Binding::new(format!("{NOTIFICATION_EXCHANGE}.{queue}")),
        ConsumerOptions::manual(tag),
    )
}

/// The collector consumes its own dead letters. A redelivery that dies
/// again loops straight back with a grown x-death count.
pub fn collector_session() -> Session {
    Session::consuming(
        Exchange::durable_direct(FAILED_EXCHANGE),
        Queue::durable_with_dead_letter(
            FAILED_COLLECTOR_QUEUE,
            FAILED_EXCHANGE,
            FAILED_COLLECTOR_ROUTING_KEY,
        ),
        Binding::new(FAILED_COLLECTOR_ROUTING_KEY),
        ConsumerOptions::manual("HitokotoFailedMessageCollectWorker"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use amqp_worker::{DEAD_LETTER_EXCHANGE_ARG, DEAD_LETTER_ROUTING_KEY_ARG};
    use amqp_worker::lapin::types::AMQPValue;

    #[test]
    fn notification_session_binds_by_exchange_and_queue() {
        let session = notification_session("hitokoto_appended", "HitokotoAppendedNotificationWorker");
        assert_eq!(session.exchange.name, "notification");
        assert_eq!(session.queue.name, "hitokoto_appended");
        assert_eq!(session.binding.routing_key, "notification.hitokoto_appended");
        let options = session.consumer.expect("consuming session");
        assert_eq!(options.tag, "HitokotoAppendedNotificationWorker");
        assert!(options.ack_by_error);
        assert!(!options.auto_ack);
    }

    #[test]
    fn notification_queues_dead_letter_into_the_collector() {
        let session = notification_session("hitokoto_reviewed", "HitokotoReviewedNotificationWorker");
        let args = session.queue.args.inner();
        assert_eq!(
            args.get(DEAD_LETTER_EXCHANGE_ARG),
            Some(&AMQPValue::LongString("notification_failed".into()))
        );
        assert_eq!(
            args.get(DEAD_LETTER_ROUTING_KEY_ARG),
            Some(&AMQPValue::LongString(
                "notification_failed.notification_failed_collector".into()
            ))
        );
    }

    #[test]
    fn collector_dead_letters_to_itself() {
        let session = collector_session();
        assert_eq!(session.queue.name, FAILED_COLLECTOR_QUEUE);
        assert_eq!(session.binding.routing_key, FAILED_COLLECTOR_ROUTING_KEY);
        let args = session.queue.args.inner();
        assert_eq!(
            args.get(DEAD_LETTER_ROUTING_KEY_ARG),
            Some(&AMQPValue::LongString(FAILED_COLLECTOR_ROUTING_KEY.into()))
        );
    }
}
