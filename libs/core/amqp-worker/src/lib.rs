//! AMQP 0.9.1 worker framework for queue-driven background processing.
//!
//! This library wraps [`lapin`] with a self-healing connection layer and a
//! registry (`Instance`) that owns every consumer and producer a process
//! runs. Consumers declare their own topology and recover their channels;
//! producers are cached by routing key and lazily re-created when their
//! channel dies.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐     ┌─────────────────────┐     ┌────────────────┐
//! │    Producer    │────▶│      RabbitMQ       │────▶│    Consumer    │
//! │ (confirm mode) │     │ (exchange + queue)  │     │ (stream loop)  │
//! └────────────────┘     └─────────────────────┘     └────────────────┘
//!         ▲                        │                         │
//!         │                        ▼                         ▼
//! ┌────────────────┐     ┌─────────────────┐        ┌────────────────┐
//! │ DeliveryContext│     │ Dead-letter x   │        │DeliveryHandler │
//! │ (producer cache)│    │ (failed queue)  │        │  (your logic)  │
//! └────────────────┘     └─────────────────┘        └────────────────┘
//! ```
//!
//! # Key Features
//!
//! - **Self-healing connection**: bounded redial on connection loss, with
//!   fail-fast process exit when the broker stays unreachable
//! - **Channel recovery**: consumers rebuild channel, topology and stream
//!   after a channel-level fault
//! - **Settlement policy**: per-consumer choice between broker auto-ack,
//!   outcome-driven ack/nack, and leave-it-unsettled
//! - **Producer cache**: handlers resolve producers by routing key and
//!   never hold a dead channel
//! - **Graceful shutdown**: consumers stop before producers, producers
//!   before the connection, with a one-shot close notification
//!
//! # Example
//!
//! ```rust,ignore
//! use amqp_worker::{
//!     AmqpConfig, Binding, ConsumerConfig, ConsumerOptions, Exchange, Instance, Queue, Session,
//! };
//!
//! let instance = Instance::init(&AmqpConfig::from_env()?).await?;
//!
//! instance.register_consumer_config(ConsumerConfig::new(
//!     Session::consuming(
//!         Exchange::durable_direct("events"),
//!         Queue::durable("user_signed_up"),
//!         Binding::new("events.user_signed_up"),
//!         ConsumerOptions::manual("signup-worker"),
//!     ),
//!     Arc::new(SignupHandler),
//! ));
//! instance.subscribe_consumers().await?;
//!
//! instance.on_close(|err| match err {
//!     None => info!("closed cleanly"),
//!     Some(err) => error!(err, "closed with error"),
//! }).await;
//! ```

mod config;
mod connection;
mod consumer;
mod context;
mod error;
mod instance;
mod producer;
mod topology;

pub use config::AmqpConfig;
pub use connection::ConnectionManager;
pub use consumer::{Consumer, DeliveryHandler};
pub use context::DeliveryContext;
pub use error::AmqpError;
pub use instance::{ConsumerConfig, Instance, SUBSCRIBE_TIMEOUT};
pub use producer::{Producer, ReturnHandler};
pub use topology::{
    dead_letter_args, Binding, ConsumerOptions, Exchange, PublishingOptions, Queue, Session,
    DEAD_LETTER_EXCHANGE_ARG, DEAD_LETTER_ROUTING_KEY_ARG, X_DEATH_COUNT_FIELD, X_DEATH_HEADER,
    X_FIRST_DEATH_EXCHANGE_HEADER, X_FIRST_DEATH_QUEUE_HEADER,
};

// Handlers deserialize payloads and inspect headers through lapin types.
pub use lapin;
