//! The registry tying the substrate together: it owns the connection
//! manager, every registered consumer and producer, the routing-key
//! producer cache, and the process close notification.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AmqpConfig;
use crate::connection::ConnectionManager;
use crate::consumer::{Consumer, DeliveryHandler};
use crate::error::AmqpError;
use crate::producer::{Producer, ReturnHandler};
use crate::topology::Session;

/// Default budget for subscribing every pending consumer.
pub const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// One consumer registration: its topology session (which must carry
/// consumer options), an optional prefetch cap, and the handler.
#[derive(Clone)]
pub struct ConsumerConfig {
    pub session: Session,
    pub prefetch: Option<u16>,
    pub handler: Arc<dyn DeliveryHandler>,
}

impl ConsumerConfig {
    pub fn new(session: Session, handler: Arc<dyn DeliveryHandler>) -> Self {
        Self {
            session,
            prefetch: None,
            handler,
        }
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    fn tag(&self) -> String {
        self.session
            .consumer
            .as_ref()
            .map(|options| options.tag.clone())
            .unwrap_or_default()
    }
}

struct ConsumerUnit {
    uuid: Uuid,
    consumer: Arc<Consumer>,
}

struct ProducerUnit {
    uuid: Uuid,
    producer: Arc<Producer>,
}

/// Routing-key to producer identity map.
///
/// Purely an optimization: entries are recreated on demand, and a racing
/// writer that loses simply leaves its producer registered but uncached.
pub(crate) struct ProducerCache {
    map: RwLock<HashMap<String, Uuid>>,
}

impl ProducerCache {
    fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) async fn lookup(&self, routing_key: &str) -> Option<Uuid> {
        self.map.read().await.get(routing_key).copied()
    }

    pub(crate) async fn store(&self, routing_key: String, uuid: Uuid) {
        self.map.write().await.insert(routing_key, uuid);
    }

    pub(crate) async fn evict(&self, routing_key: &str) {
        self.map.write().await.remove(routing_key);
    }

    async fn clear(&self) {
        self.map.write().await.clear();
    }
}

/// Process-wide registry over one broker connection.
pub struct Instance {
    manager: Arc<ConnectionManager>,
    pending: StdMutex<Vec<ConsumerConfig>>,
    consumers: RwLock<Vec<ConsumerUnit>>,
    producers: RwLock<Vec<ProducerUnit>>,
    pub(crate) producer_cache: ProducerCache,
    close_tx: StdMutex<Option<oneshot::Sender<Option<String>>>>,
    close_rx: Mutex<Option<oneshot::Receiver<Option<String>>>>,
    closed: AtomicBool,
}

impl Instance {
    /// Dials the broker and starts the reconnect watcher.
    pub async fn init(config: &AmqpConfig) -> Result<Arc<Self>, AmqpError> {
        let manager = ConnectionManager::dial(config).await?;
        let (close_tx, close_rx) = oneshot::channel();

        let instance = Arc::new(Self {
            manager,
            pending: StdMutex::new(Vec::new()),
            consumers: RwLock::new(Vec::new()),
            producers: RwLock::new(Vec::new()),
            producer_cache: ProducerCache::new(),
            close_tx: StdMutex::new(Some(close_tx)),
            close_rx: Mutex::new(Some(close_rx)),
            closed: AtomicBool::new(false),
        });

        instance.spawn_rebind_watcher();
        Ok(instance)
    }

    fn spawn_rebind_watcher(self: &Arc<Self>) {
        let mut rebind = self.manager.subscribe_rebind();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while rebind.recv().await.is_ok() {
                let Some(instance) = weak.upgrade() else { break };
                let consumers = instance.consumers.read().await.len();
                let producers = instance.producers.read().await.len();
                info!(
                    consumers,
                    producers,
                    "connection replaced, channels re-acquire off the new connection"
                );
            }
        });
    }

    /// Queues a consumer registration without touching the broker,
    /// allowing declarative batch setup before [`Instance::subscribe_consumers`].
    pub fn register_consumer_config(&self, config: ConsumerConfig) {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .push(config);
    }

    /// Registers every queued consumer concurrently under the default
    /// timeout.
    pub async fn subscribe_consumers(self: &Arc<Self>) -> Result<(), AmqpError> {
        self.subscribe_consumers_with_timeout(SUBSCRIBE_TIMEOUT).await
    }

    /// Registers every queued consumer concurrently. The first failure
    /// cancels the remaining registrations and is returned wrapped with
    /// the failing consumer's tag.
    pub async fn subscribe_consumers_with_timeout(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<(), AmqpError> {
        let configs: Vec<ConsumerConfig> = self
            .pending
            .lock()
            .expect("pending lock poisoned")
            .drain(..)
            .collect();
        if configs.is_empty() {
            return Ok(());
        }

        let mut registrations: JoinSet<Result<(), AmqpError>> = JoinSet::new();
        for config in configs {
            let instance = Arc::clone(self);
            let tag = config.tag();
            registrations.spawn(async move {
                instance
                    .register_consumer(config)
                    .await
                    .map(|_| ())
                    .map_err(|err| AmqpError::subscribe(tag, err))
            });
        }

        // Dropping the JoinSet on timeout aborts whatever is still running.
        let drain = async {
            while let Some(joined) = registrations.join_next().await {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        registrations.abort_all();
                        return Err(err);
                    }
                    Err(err) => {
                        registrations.abort_all();
                        return Err(AmqpError::SubscribeTask(err.to_string()));
                    }
                }
            }
            Ok(())
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(result) => result,
            Err(_) => Err(AmqpError::SubscribeTimeout(timeout)),
        }
    }

    /// Constructs a consumer, starts consumption and adds it to the
    /// registry.
    pub async fn register_consumer(
        self: &Arc<Self>,
        config: ConsumerConfig,
    ) -> Result<Uuid, AmqpError> {
        let consumer = Arc::new(Consumer::new(Arc::clone(&self.manager), config.session).await?);
        if let Some(prefetch) = config.prefetch {
            consumer.qos(prefetch).await?;
        }
        consumer
            .consume(config.handler, Arc::downgrade(self))
            .await?;

        let uuid = consumer.uuid();
        self.consumers
            .write()
            .await
            .push(ConsumerUnit { uuid, consumer });
        Ok(uuid)
    }

    /// Constructs and registers a producer immediately.
    pub async fn register_producer(&self, session: Session) -> Result<Arc<Producer>, AmqpError> {
        self.add_producer(Producer::new(&self.manager, session, None).await?)
            .await
    }

    /// Same as [`Instance::register_producer`] with a broker-return
    /// callback for strict-delivery publishing.
    pub async fn register_producer_with_return_handler(
        &self,
        session: Session,
        on_return: ReturnHandler,
    ) -> Result<Arc<Producer>, AmqpError> {
        self.add_producer(Producer::new(&self.manager, session, Some(on_return)).await?)
            .await
    }

    async fn add_producer(&self, producer: Producer) -> Result<Arc<Producer>, AmqpError> {
        let producer = Arc::new(producer);
        self.producers.write().await.push(ProducerUnit {
            uuid: producer.uuid(),
            producer: Arc::clone(&producer),
        });
        Ok(producer)
    }

    pub async fn consumer_by_uuid(&self, uuid: Uuid) -> Option<Arc<Consumer>> {
        self.consumers
            .read()
            .await
            .iter()
            .find(|unit| unit.uuid == uuid)
            .map(|unit| Arc::clone(&unit.consumer))
    }

    /// Looks a producer up by identity. A producer whose channel is
    /// observed closed is pruned and reported as absent, forcing the
    /// caller to re-register.
    pub async fn producer_by_uuid(&self, uuid: Uuid) -> Option<Arc<Producer>> {
        {
            let producers = self.producers.read().await;
            let unit = producers.iter().find(|unit| unit.uuid == uuid)?;
            if unit.producer.is_live() {
                return Some(Arc::clone(&unit.producer));
            }
        }
        warn!(uuid = %uuid, "producer channel is closed, pruning it");
        self.producers.write().await.retain(|unit| unit.uuid != uuid);
        None
    }

    /// Shuts down consumers, then producers, then the connection, in
    /// that order, stopping at the first error. Always fires the
    /// one-shot close notification with the final error state.
    pub async fn shutdown(&self) -> Result<(), AmqpError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self.shutdown_stages().await;
        let state = result.as_ref().err().map(|err| err.to_string());
        let close_tx = self.close_tx.lock().expect("close lock poisoned").take();
        if let Some(tx) = close_tx {
            let _ = tx.send(state);
        }
        result
    }

    async fn shutdown_stages(&self) -> Result<(), AmqpError> {
        let consumers = std::mem::take(&mut *self.consumers.write().await);
        for unit in &consumers {
            unit.consumer
                .shutdown()
                .await
                .map_err(|err| AmqpError::shutdown("consumers", err))?;
        }

        let producers = std::mem::take(&mut *self.producers.write().await);
        for unit in &producers {
            unit.producer
                .shutdown()
                .await
                .map_err(|err| AmqpError::shutdown("producers", err))?;
        }
        self.producer_cache.clear().await;

        self.manager
            .shutdown()
            .await
            .map_err(|err| AmqpError::shutdown("connection", err))
    }

    /// Blocks until the close notification fires, then invokes `f` with
    /// the shutdown error, if any. The notification is consumable
    /// exactly once.
    pub async fn on_close<F>(&self, f: F)
    where
        F: FnOnce(Option<&str>),
    {
        let close_rx = self.close_rx.lock().await.take();
        match close_rx {
            Some(rx) => {
                let state = rx.await.unwrap_or(None);
                f(state.as_deref());
            }
            None => warn!("close notification was already consumed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Registration paths need a live broker; the cache's mechanics are
    // what the self-healing producer lookup leans on.

    #[tokio::test]
    async fn cache_stores_and_looks_up_by_routing_key() {
        let cache = ProducerCache::new();
        let uuid = Uuid::new_v4();
        cache
            .store("notification.hitokoto_appended".to_string(), uuid)
            .await;
        assert_eq!(
            cache.lookup("notification.hitokoto_appended").await,
            Some(uuid)
        );
        assert_eq!(cache.lookup("notification.hitokoto_reviewed").await, None);
    }

    #[tokio::test]
    async fn evicted_entries_are_gone_until_restored() {
        let cache = ProducerCache::new();
        let stale = Uuid::new_v4();
        cache.store("notification_failed.notification_failed_can".to_string(), stale).await;

        cache.evict("notification_failed.notification_failed_can").await;
        assert_eq!(
            cache.lookup("notification_failed.notification_failed_can").await,
            None
        );

        let fresh = Uuid::new_v4();
        cache.store("notification_failed.notification_failed_can".to_string(), fresh).await;
        assert_eq!(
            cache.lookup("notification_failed.notification_failed_can").await,
            Some(fresh)
        );
    }

    #[tokio::test]
    async fn storing_twice_keeps_the_last_writer() {
        let cache = ProducerCache::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        cache.store("key".to_string(), first).await;
        cache.store("key".to_string(), second).await;
        assert_eq!(cache.lookup("key").await, Some(second));
    }
}
