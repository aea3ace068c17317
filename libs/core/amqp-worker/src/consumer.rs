//! Consuming side of the substrate.
//!
//! A consumer owns one channel, declares its topology (exchange, then
//! queue, then binding), and supervises a delivery loop that hands every
//! message to its own task. Handler work is bounded by a one-hour
//! timeout; a task that overruns settles nothing and leaves redelivery
//! to the broker.

use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::Channel;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::connection::{shutdown_channel, ConnectionManager};
use crate::context::DeliveryContext;
use crate::error::AmqpError;
use crate::instance::Instance;
use crate::topology::{ConsumerOptions, Session};

/// Channel reacquisition attempts after an unexpected channel loss.
const RECOVER_ATTEMPTS: usize = 5;
/// Fixed delay between reacquisition attempts.
const RECOVER_DELAY: Duration = Duration::from_secs(8);
/// Ceiling for a single handler invocation. Generous on purpose: outbound
/// mail can be slow, and settling a delivery whose handler is still
/// running would double-settle it.
const HANDLER_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Processes one delivery within a request-scoped context.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, ctx: DeliveryContext, delivery: &Delivery) -> eyre::Result<()>;
}

/// A channel-owning consumer bound to one session.
pub struct Consumer {
    uuid: Uuid,
    session: Session,
    options: ConsumerOptions,
    prefetch: StdMutex<Option<u16>>,
    // Shared with the delivery loop, which swaps in a fresh channel after
    // recovery; shutdown must cancel whichever channel is current.
    channel: Arc<StdRwLock<Channel>>,
    manager: Arc<ConnectionManager>,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl Consumer {
    /// Opens a channel and declares the session's topology. Declaration
    /// order is exchange, queue, binding; the first failure aborts
    /// construction.
    pub(crate) async fn new(
        manager: Arc<ConnectionManager>,
        session: Session,
    ) -> Result<Self, AmqpError> {
        let options = session
            .consumer
            .clone()
            .ok_or(AmqpError::MissingConsumerOptions)?;

        let channel = manager.create_channel().await?;
        declare_topology(&channel, &session).await?;

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            uuid: Uuid::new_v4(),
            session,
            options,
            prefetch: StdMutex::new(None),
            channel: Arc::new(StdRwLock::new(channel)),
            manager,
            shutdown_tx,
            loop_handle: StdMutex::new(None),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn tag(&self) -> &str {
        &self.options.tag
    }

    /// Caps the broker's in-flight unacknowledged deliveries for this
    /// consumer. Reapplied if the channel is ever replaced.
    pub async fn qos(&self, prefetch_count: u16) -> Result<(), AmqpError> {
        self.current_channel()
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(AmqpError::Channel)?;
        *self.prefetch.lock().expect("prefetch lock poisoned") = Some(prefetch_count);
        Ok(())
    }

    /// Starts the delivery stream and the supervising loop.
    pub(crate) async fn consume(
        &self,
        handler: Arc<dyn DeliveryHandler>,
        instance: Weak<Instance>,
    ) -> Result<(), AmqpError> {
        let deliveries = open_stream(&self.current_channel(), &self.session, &self.options).await?;

        let loop_ctx = LoopCtx {
            channel: Arc::clone(&self.channel),
            manager: Arc::clone(&self.manager),
            session: self.session.clone(),
            options: self.options.clone(),
            prefetch: *self.prefetch.lock().expect("prefetch lock poisoned"),
            handler,
            instance,
        };
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(run_delivery_loop(deliveries, loop_ctx, shutdown_rx));
        *self.loop_handle.lock().expect("loop handle lock poisoned") = Some(handle);

        info!(
            queue = %self.session.queue.name,
            tag = %self.options.tag,
            "consumer started"
        );
        Ok(())
    }

    /// Cancels the tag, closes the channel and waits for the delivery
    /// loop to finish. Per-delivery tasks already in flight are left to
    /// settle (or time out) on their own.
    pub(crate) async fn shutdown(&self) -> Result<(), AmqpError> {
        let _ = self.shutdown_tx.send(true);
        shutdown_channel(&self.current_channel(), &self.options.tag).await?;

        let handle = self
            .loop_handle
            .lock()
            .expect("loop handle lock poisoned")
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(tag = %self.options.tag, error = %err, "delivery loop aborted");
            }
        }
        info!(tag = %self.options.tag, "consumer shutdown complete");
        Ok(())
    }

    fn current_channel(&self) -> Channel {
        self.channel.read().expect("channel lock poisoned").clone()
    }
}

/// Declares exchange, queue and binding, in that order. Redeclaring an
/// identical topology is a no-op on the broker, so this is safe to run
/// again on a recovered channel.
pub(crate) async fn declare_topology(channel: &Channel, session: &Session) -> Result<(), AmqpError> {
    let exchange = &session.exchange;
    channel
        .exchange_declare(
            &exchange.name,
            exchange.kind.clone(),
            ExchangeDeclareOptions {
                passive: false,
                durable: exchange.durable,
                auto_delete: exchange.auto_delete,
                internal: exchange.internal,
                nowait: exchange.no_wait,
            },
            exchange.args.clone(),
        )
        .await
        .map_err(|err| AmqpError::declare_exchange(&exchange.name, err))?;

    let queue = &session.queue;
    channel
        .queue_declare(
            &queue.name,
            QueueDeclareOptions {
                passive: false,
                durable: queue.durable,
                exclusive: queue.exclusive,
                auto_delete: queue.auto_delete,
                nowait: queue.no_wait,
            },
            queue.args.clone(),
        )
        .await
        .map_err(|err| AmqpError::declare_queue(&queue.name, err))?;

    let binding = &session.binding;
    channel
        .queue_bind(
            &queue.name,
            &exchange.name,
            &binding.routing_key,
            QueueBindOptions {
                nowait: binding.no_wait,
            },
            binding.args.clone(),
        )
        .await
        .map_err(|err| AmqpError::bind_queue(&queue.name, &exchange.name, err))?;

    debug!(
        exchange = %exchange.name,
        queue = %queue.name,
        routing_key = %binding.routing_key,
        "topology declared"
    );
    Ok(())
}

async fn open_stream(
    channel: &Channel,
    session: &Session,
    options: &ConsumerOptions,
) -> Result<lapin::Consumer, AmqpError> {
    channel
        .basic_consume(
            &session.queue.name,
            &options.tag,
            BasicConsumeOptions {
                no_local: options.no_local,
                no_ack: options.auto_ack,
                exclusive: options.exclusive,
                nowait: options.no_wait,
            },
            options.args.clone(),
        )
        .await
        .map_err(|err| AmqpError::consume(&session.queue.name, err))
}

/// Everything the supervising loop needs to run and to rebuild its
/// channel after a loss.
struct LoopCtx {
    channel: Arc<StdRwLock<Channel>>,
    manager: Arc<ConnectionManager>,
    session: Session,
    options: ConsumerOptions,
    prefetch: Option<u16>,
    handler: Arc<dyn DeliveryHandler>,
    instance: Weak<Instance>,
}

async fn run_delivery_loop(
    mut deliveries: lapin::Consumer,
    ctx: LoopCtx,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        while let Some(item) = deliveries.next().await {
            match item {
                Ok(delivery) => spawn_delivery_task(&ctx, delivery),
                Err(err) => {
                    error!(tag = %ctx.options.tag, error = %err, "delivery stream error");
                    break;
                }
            }
        }

        if *shutdown_rx.borrow() {
            debug!(tag = %ctx.options.tag, "delivery stream drained, consumer stopping");
            return;
        }

        match recover_channel(&ctx, &mut shutdown_rx).await {
            Some(stream) => deliveries = stream,
            None => return,
        }
    }
}

/// Reacquires a channel after an unexpected loss, bounded to
/// [`RECOVER_ATTEMPTS`] tries [`RECOVER_DELAY`] apart. Exhausting them
/// terminates the process, matching the connection manager's fail-fast
/// policy. Returns `None` when shutdown arrives mid-recovery.
async fn recover_channel(
    ctx: &LoopCtx,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Option<lapin::Consumer> {
    warn!(tag = %ctx.options.tag, "consumer channel lost, recovering");
    let mut rebind = ctx.manager.subscribe_rebind();

    for attempt in 1..=RECOVER_ATTEMPTS {
        tokio::select! {
            _ = tokio::time::sleep(RECOVER_DELAY) => {}
            _ = rebind.recv() => {
                debug!(tag = %ctx.options.tag, "connection replaced, retrying channel now");
            }
            _ = shutdown_rx.changed() => {}
        }
        if *shutdown_rx.borrow() {
            return None;
        }

        match reopen(ctx).await {
            Ok(stream) => {
                info!(attempt, tag = %ctx.options.tag, "consumer channel recovered");
                return Some(stream);
            }
            Err(err) => {
                error!(attempt, tag = %ctx.options.tag, error = %err, "channel recovery failed");
            }
        }
    }

    error!(
        attempts = RECOVER_ATTEMPTS,
        tag = %ctx.options.tag,
        "consumer channel unrecoverable, terminating"
    );
    std::process::exit(1);
}

async fn reopen(ctx: &LoopCtx) -> Result<lapin::Consumer, AmqpError> {
    let channel = ctx.manager.create_channel().await?;
    declare_topology(&channel, &ctx.session).await?;
    if let Some(prefetch) = ctx.prefetch {
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(AmqpError::Channel)?;
    }
    let stream = open_stream(&channel, &ctx.session, &ctx.options).await?;
    *ctx.channel.write().expect("channel lock poisoned") = channel;
    Ok(stream)
}

/// Runs the handler for one delivery in its own task and settles the
/// delivery according to the consumer options.
fn spawn_delivery_task(ctx: &LoopCtx, delivery: Delivery) {
    let options = ctx.options.clone();
    let handler = Arc::clone(&ctx.handler);
    let instance = ctx.instance.clone();

    tokio::spawn(async move {
        let trace_id = Uuid::new_v4();
        let span = info_span!("delivery", trace_id = %trace_id, consumer_tag = %options.tag);

        async {
            let Some(instance) = instance.upgrade() else {
                warn!("registry gone, leaving delivery unsettled");
                return;
            };
            let dctx = DeliveryContext::new(instance, trace_id, options.tag.clone());

            let outcome =
                match tokio::time::timeout(HANDLER_TIMEOUT, handler.handle(dctx, &delivery)).await {
                    Ok(Ok(())) => HandlerOutcome::Success,
                    Ok(Err(err)) => {
                        error!(
                            error = ?err,
                            headers = ?delivery.properties.headers(),
                            body = %String::from_utf8_lossy(&delivery.data),
                            "handler failed"
                        );
                        HandlerOutcome::Failed
                    }
                    Err(_) => {
                        error!(
                            timeout = ?HANDLER_TIMEOUT,
                            body = %String::from_utf8_lossy(&delivery.data),
                            "handler timed out, leaving delivery unsettled"
                        );
                        HandlerOutcome::TimedOut
                    }
                };

            match settlement(outcome, &options) {
                Settlement::Ack => {
                    if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                        error!(error = %err, "ack failed");
                    }
                }
                Settlement::Nack => {
                    if let Err(err) = delivery
                        .nack(BasicNackOptions {
                            multiple: false,
                            requeue: false,
                        })
                        .await
                    {
                        error!(error = %err, "nack failed");
                    }
                }
                Settlement::Leave => {}
            }
        }
        .instrument(span)
        .await;
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerOutcome {
    Success,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Ack,
    Nack,
    Leave,
}

/// Decides how a delivery is settled once its handler finished (or timed
/// out). Auto-ack consumers never settle here, and a timed-out handler
/// may still be running, so its delivery is never settled either.
fn settlement(outcome: HandlerOutcome, options: &ConsumerOptions) -> Settlement {
    if options.auto_ack || !options.ack_by_error {
        return Settlement::Leave;
    }
    match outcome {
        HandlerOutcome::Success => Settlement::Ack,
        HandlerOutcome::Failed => Settlement::Nack,
        HandlerOutcome::TimedOut => Settlement::Leave,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The consume loop itself needs a live broker; settlement is the
    // part with rules worth pinning down.

    fn manual_options() -> ConsumerOptions {
        ConsumerOptions::manual("TestWorker")
    }

    #[test]
    fn success_acks_exactly_once() {
        assert_eq!(
            settlement(HandlerOutcome::Success, &manual_options()),
            Settlement::Ack
        );
    }

    #[test]
    fn failure_nacks_without_requeue() {
        assert_eq!(
            settlement(HandlerOutcome::Failed, &manual_options()),
            Settlement::Nack
        );
    }

    #[test]
    fn timeout_settles_nothing() {
        assert_eq!(
            settlement(HandlerOutcome::TimedOut, &manual_options()),
            Settlement::Leave
        );
    }

    #[test]
    fn auto_ack_ignores_ack_by_error() {
        let options = ConsumerOptions {
            auto_ack: true,
            ..ConsumerOptions::manual("TestWorker")
        };
        for outcome in [
            HandlerOutcome::Success,
            HandlerOutcome::Failed,
            HandlerOutcome::TimedOut,
        ] {
            assert_eq!(settlement(outcome, &options), Settlement::Leave);
        }
    }

    #[test]
    fn manual_without_ack_by_error_never_settles() {
        let options = ConsumerOptions {
            tag: "TestWorker".to_string(),
            ..ConsumerOptions::default()
        };
        for outcome in [
            HandlerOutcome::Success,
            HandlerOutcome::Failed,
            HandlerOutcome::TimedOut,
        ] {
            assert_eq!(settlement(outcome, &options), Settlement::Leave);
        }
    }
}
