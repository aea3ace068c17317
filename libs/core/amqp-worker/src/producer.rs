//! Publishing side of the substrate.
//!
//! Producers never declare topology; the consumer that owns an
//! exchange/queue pair declares it. A producer whose channel dies is not
//! revived either: the registry detects the dead channel on the next
//! lookup and a fresh producer is registered in its place.

use lapin::message::BasicReturnMessage;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::{BasicProperties, Channel};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{shutdown_channel, ConnectionManager};
use crate::error::AmqpError;
use crate::topology::Session;

/// Callback invoked with every broker-returned (undeliverable) message.
pub type ReturnHandler = Box<dyn Fn(&BasicReturnMessage) + Send + Sync>;

/// A channel-owning publisher bound to one session.
pub struct Producer {
    uuid: Uuid,
    session: Session,
    channel: Channel,
    on_return: Option<ReturnHandler>,
}

impl Producer {
    pub(crate) async fn new(
        manager: &ConnectionManager,
        session: Session,
        on_return: Option<ReturnHandler>,
    ) -> Result<Self, AmqpError> {
        let publishing = session
            .publishing
            .as_ref()
            .ok_or(AmqpError::MissingPublishingOptions)?;

        let channel = manager.create_channel().await?;

        let tag = publishing.tag.clone();
        channel.on_error(move |err| {
            // No self-healing here; the registry prunes dead producers.
            warn!(tag = %tag, error = %err, "producer channel closed");
        });

        // Returned messages only surface through publisher confirms.
        if publishing.mandatory || on_return.is_some() {
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(AmqpError::Channel)?;
        }

        let producer = Self {
            uuid: Uuid::new_v4(),
            session,
            channel,
            on_return,
        };
        debug!(
            uuid = %producer.uuid,
            exchange = %producer.session.exchange.name,
            queue = %producer.session.queue.name,
            routing_key = %producer.routing_key(),
            "producer ready"
        );
        Ok(producer)
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The effective routing key, with the default-exchange fallback.
    pub fn routing_key(&self) -> String {
        self.session.routing_key()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Whether the underlying channel is still open.
    pub fn is_live(&self) -> bool {
        self.channel.status().connected()
    }

    /// Publishes `body` with the caller's properties, unmodified.
    pub async fn publish(&self, properties: BasicProperties, body: &[u8]) -> Result<(), AmqpError> {
        let publishing = self
            .session
            .publishing
            .as_ref()
            .ok_or(AmqpError::MissingPublishingOptions)?;
        let routing_key = self.routing_key();
        let destination = format!("{}.{}", self.session.exchange.name, self.session.queue.name);

        let confirmation = self
            .channel
            .basic_publish(
                &self.session.exchange.name,
                &routing_key,
                BasicPublishOptions {
                    mandatory: publishing.mandatory,
                    immediate: publishing.immediate,
                },
                body,
                properties,
            )
            .await
            .map_err(|err| AmqpError::publish(destination.clone(), err))?
            .await
            .map_err(|err| AmqpError::publish(destination.clone(), err))?;

        if let Confirmation::Ack(Some(returned)) | Confirmation::Nack(Some(returned)) =
            confirmation
        {
            warn!(
                destination = %destination,
                routing_key = %routing_key,
                "publish returned by broker"
            );
            if let Some(handler) = &self.on_return {
                handler(&returned);
            }
        }

        Ok(())
    }

    /// Cancels the publishing tag and closes the channel.
    pub(crate) async fn shutdown(&self) -> Result<(), AmqpError> {
        let publishing = self
            .session
            .publishing
            .as_ref()
            .ok_or(AmqpError::MissingPublishingOptions)?;
        shutdown_channel(&self.channel, &publishing.tag).await?;
        info!(uuid = %self.uuid, tag = %publishing.tag, "producer shutdown complete");
        Ok(())
    }
}
