//! Error types for the AMQP worker substrate.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Broker reply code sent while a connection or channel is already closing.
///
/// Closing an endpoint the broker is tearing down at the same time races
/// with the broker's own close frame, so shutdown paths treat this reply
/// as success.
pub const ALREADY_CLOSING: u16 = 504;

/// Errors produced by the messaging substrate.
#[derive(Error, Debug)]
pub enum AmqpError {
    /// Broker settings were absent or empty where a connection was required.
    #[error("broker configuration is missing")]
    MissingConfig,

    /// No live connection is available to hand out channels.
    #[error("no live broker connection")]
    NotConnected,

    /// The initial dial to the broker failed.
    #[error("failed to dial broker: {0}")]
    Dial(#[source] lapin::Error),

    /// Opening a channel on the live connection failed.
    #[error("failed to open channel: {0}")]
    Channel(#[source] lapin::Error),

    #[error("failed to declare exchange '{name}': {source}")]
    DeclareExchange {
        name: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to declare queue '{name}': {source}")]
    DeclareQueue {
        name: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to bind queue '{queue}' to exchange '{exchange}': {source}")]
    BindQueue {
        queue: String,
        exchange: String,
        #[source]
        source: lapin::Error,
    },

    /// A consumer session was built without consumer options.
    #[error("consumer options are missing")]
    MissingConsumerOptions,

    /// A producer session was built without publishing options.
    #[error("publishing options are missing")]
    MissingPublishingOptions,

    #[error("failed to start consuming from queue '{queue}': {source}")]
    Consume {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to publish to '{destination}': {source}")]
    Publish {
        destination: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to cancel consumer tag '{tag}': {source}")]
    Cancel {
        tag: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to close channel: {0}")]
    CloseChannel(#[source] lapin::Error),

    #[error("failed to close connection: {0}")]
    CloseConnection(#[source] lapin::Error),

    /// Registration failure wrapped with the consumer tag it belongs to.
    #[error("consumer '{tag}': {source}")]
    Subscribe {
        tag: String,
        #[source]
        source: Box<AmqpError>,
    },

    #[error("consumer subscription did not finish within {0:?}")]
    SubscribeTimeout(Duration),

    /// A registration task panicked or was aborted before finishing.
    #[error("consumer registration task failed: {0}")]
    SubscribeTask(String),

    /// Shutdown failure wrapped with the stage it happened in.
    #[error("{stage} shutdown error: {source}")]
    Shutdown {
        stage: &'static str,
        #[source]
        source: Box<AmqpError>,
    },

    #[error("producer {0} is not registered")]
    ProducerNotFound(Uuid),
}

impl AmqpError {
    pub(crate) fn declare_exchange(name: &str, source: lapin::Error) -> Self {
        Self::DeclareExchange {
            name: name.to_owned(),
            source,
        }
    }

    pub(crate) fn declare_queue(name: &str, source: lapin::Error) -> Self {
        Self::DeclareQueue {
            name: name.to_owned(),
            source,
        }
    }

    pub(crate) fn bind_queue(queue: &str, exchange: &str, source: lapin::Error) -> Self {
        Self::BindQueue {
            queue: queue.to_owned(),
            exchange: exchange.to_owned(),
            source,
        }
    }

    pub(crate) fn consume(queue: &str, source: lapin::Error) -> Self {
        Self::Consume {
            queue: queue.to_owned(),
            source,
        }
    }

    pub(crate) fn publish(destination: String, source: lapin::Error) -> Self {
        Self::Publish {
            destination,
            source,
        }
    }

    pub(crate) fn cancel(tag: &str, source: lapin::Error) -> Self {
        Self::Cancel {
            tag: tag.to_owned(),
            source,
        }
    }

    pub(crate) fn subscribe(tag: String, source: AmqpError) -> Self {
        Self::Subscribe {
            tag,
            source: Box::new(source),
        }
    }

    pub(crate) fn shutdown(stage: &'static str, source: AmqpError) -> Self {
        Self::Shutdown {
            stage,
            source: Box::new(source),
        }
    }
}

/// Whether a broker error is the 504 "already closing" reply.
pub fn is_already_closing(err: &lapin::Error) -> bool {
    matches!(err, lapin::Error::ProtocolError(e) if e.get_id() == ALREADY_CLOSING)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_error_carries_the_consumer_tag() {
        let err = AmqpError::subscribe(
            "HitokotoAppendedNotificationWorker".to_string(),
            AmqpError::NotConnected,
        );
        let msg = err.to_string();
        assert!(msg.contains("HitokotoAppendedNotificationWorker"));
        assert!(msg.contains("no live broker connection"));
    }

    #[test]
    fn shutdown_error_names_the_stage() {
        let err = AmqpError::shutdown("consumers", AmqpError::NotConnected);
        assert_eq!(
            err.to_string(),
            "consumers shutdown error: no live broker connection"
        );
    }

    #[test]
    fn declare_errors_name_the_entity() {
        let err = AmqpError::declare_exchange("notification", lapin::Error::InvalidConnectionState(lapin::ConnectionState::Closed));
        assert!(err.to_string().contains("notification"));

        let err = AmqpError::bind_queue(
            "hitokoto_appended",
            "notification",
            lapin::Error::InvalidConnectionState(lapin::ConnectionState::Closed),
        );
        let msg = err.to_string();
        assert!(msg.contains("hitokoto_appended"));
        assert!(msg.contains("notification"));
    }

    #[test]
    fn subscribe_timeout_reports_the_budget() {
        let err = AmqpError::SubscribeTimeout(Duration::from_secs(300));
        assert!(err.to_string().contains("300"));
    }
}
