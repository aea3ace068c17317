//! Request-scoped context handed to every delivery handler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tracing::warn;
use uuid::Uuid;

use crate::error::AmqpError;
use crate::instance::Instance;
use crate::producer::Producer;
use crate::topology::Session;

/// Carries the delivery's trace identity, the owning registry and a
/// small scratch map, and resolves producers for replies and
/// republications through the instance's routing-key cache.
#[derive(Clone)]
pub struct DeliveryContext {
    instance: Arc<Instance>,
    trace_id: Uuid,
    consumer_tag: String,
    values: Arc<StdMutex<HashMap<String, serde_json::Value>>>,
}

impl DeliveryContext {
    pub(crate) fn new(instance: Arc<Instance>, trace_id: Uuid, consumer_tag: String) -> Self {
        Self {
            instance,
            trace_id,
            consumer_tag,
            values: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.values
            .lock()
            .expect("values lock poisoned")
            .insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.values
            .lock()
            .expect("values lock poisoned")
            .get(key)
            .cloned()
    }

    /// Resolves a producer for the destination, reusing a cached one
    /// when its channel is still open.
    pub async fn producer(
        &self,
        exchange: &str,
        queue: &str,
        routing_key: &str,
    ) -> Result<Arc<Producer>, AmqpError> {
        self.producer_with_options(Session::direct(exchange, queue, routing_key))
            .await
    }

    /// [`DeliveryContext::producer`] over a prepared session, for
    /// destinations needing non-default publishing options.
    pub async fn producer_with_options(
        &self,
        mut session: Session,
    ) -> Result<Arc<Producer>, AmqpError> {
        if let Some(publishing) = session.publishing.as_mut() {
            if publishing.routing_key.is_empty() {
                publishing.routing_key =
                    format!("{}.{}", session.exchange.name, session.queue.name);
            }
        }
        let lookup_key = session.routing_key();

        let cache = &self.instance.producer_cache;
        if let Some(uuid) = cache.lookup(&lookup_key).await {
            if let Some(producer) = self.instance.producer_by_uuid(uuid).await {
                return Ok(producer);
            }
            warn!(
                routing_key = %lookup_key,
                "cached producer is gone, re-registering"
            );
            cache.evict(&lookup_key).await;
        }

        let producer = self.instance.register_producer(session).await?;
        cache
            .store(producer.routing_key().to_string(), producer.uuid())
            .await;
        Ok(producer)
    }

    /// Resolves a registered producer by identity, erroring when it was
    /// never registered or has been pruned.
    pub async fn producer_by_uuid(&self, uuid: Uuid) -> Result<Arc<Producer>, AmqpError> {
        self.instance
            .producer_by_uuid(uuid)
            .await
            .ok_or(AmqpError::ProducerNotFound(uuid))
    }
}
