//! Event bus implementation.
//!
//! Delivery model: `publish` synchronously enqueues the payload onto every
//! matching subscription's FIFO queue, and each subscription's dedicated
//! task executes the handler asynchronously. Per subscription, events are
//! handled in publish order; across subscriptions, handlers run
//! concurrently. A failing handler is logged and never poisons other
//! handlers or the publisher.
//!
//! Queues may be bounded. On overflow the oldest entry is dropped:
//! freshness beats completeness for market data consumers.

use crate::error::{BusError, BusResult};
use crate::pattern::TopicPattern;
use mercury_core::events::BusEvent;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

/// Boxed future for dyn-compatible async trait methods and handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Handler outcome; errors are logged by the delivery task.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A subscriber callback: receives the concrete topic and the payload.
pub type Handler = Arc<dyn Fn(String, Value) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Opaque subscription handle; pass back to [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Optional external broker seam. When configured, every published event
/// is additionally forwarded as serialized JSON; when marked required,
/// publishing without a connected broker fails with
/// [`BusError::Disconnected`].
pub trait BrokerBackend: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, BusResult<()>>;
    fn disconnect(&self) -> BoxFuture<'_, BusResult<()>>;
    fn publish(&self, topic: &str, payload: &str) -> BoxFuture<'_, BusResult<()>>;
}

struct Subscription {
    id: u64,
    pattern: TopicPattern,
    queue: Mutex<VecDeque<(String, Value)>>,
    capacity: Option<usize>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl Subscription {
    /// Enqueue with drop-oldest overflow. Returns false if closed.
    fn enqueue(&self, topic: String, payload: Value) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        {
            let mut queue = self.queue.lock();
            if let Some(cap) = self.capacity {
                if queue.len() >= cap {
                    queue.pop_front();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            queue.push_back((topic, payload));
        }
        self.notify.notify_one();
        true
    }
}

/// In-process pub/sub with optional external broker backing.
pub struct EventBus {
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    next_id: AtomicU64,
    broker: Option<Arc<dyn BrokerBackend>>,
    broker_required: bool,
    broker_connected: AtomicBool,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Pure in-process bus.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            broker: None,
            broker_required: false,
            broker_connected: AtomicBool::new(false),
        }
    }

    /// Bus with an external broker. When `required` is true, publishing
    /// fails while the broker is disconnected; otherwise delivery degrades
    /// to in-process only.
    pub fn with_broker(broker: Arc<dyn BrokerBackend>, required: bool) -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            broker: Some(broker),
            broker_required: required,
            broker_connected: AtomicBool::new(false),
        }
    }

    /// Connect the external broker, if one is configured.
    pub async fn connect(&self) -> BusResult<()> {
        if let Some(broker) = &self.broker {
            broker.connect().await?;
            self.broker_connected.store(true, Ordering::Release);
            debug!("event bus broker connected");
        }
        Ok(())
    }

    /// Disconnect the external broker, if one is configured.
    pub async fn disconnect(&self) -> BusResult<()> {
        if let Some(broker) = &self.broker {
            self.broker_connected.store(false, Ordering::Release);
            broker.disconnect().await?;
            debug!("event bus broker disconnected");
        }
        Ok(())
    }

    /// Whether the external broker is currently connected. Always false
    /// for a pure in-process bus.
    pub fn is_connected(&self) -> bool {
        self.broker_connected.load(Ordering::Acquire)
    }

    /// Register a handler with an unbounded delivery queue.
    pub fn subscribe(&self, pattern: &str, handler: Handler) -> BusResult<SubscriptionId> {
        self.subscribe_inner(pattern, None, handler)
    }

    /// Register a handler with a bounded queue; overflow drops the oldest
    /// pending event for that subscription.
    pub fn subscribe_bounded(
        &self,
        pattern: &str,
        capacity: usize,
        handler: Handler,
    ) -> BusResult<SubscriptionId> {
        self.subscribe_inner(pattern, Some(capacity.max(1)), handler)
    }

    fn subscribe_inner(
        &self,
        pattern: &str,
        capacity: Option<usize>,
        handler: Handler,
    ) -> BusResult<SubscriptionId> {
        let pattern = TopicPattern::parse(pattern)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscription = Arc::new(Subscription {
            id,
            pattern,
            queue: Mutex::new(VecDeque::new()),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        });

        self.subscriptions.write().push(Arc::clone(&subscription));
        tokio::spawn(deliver_loop(subscription, handler));

        Ok(SubscriptionId(id))
    }

    /// Remove a subscription. Events already queued are still delivered
    /// before the delivery task exits. Returns false for unknown ids.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        if let Some(pos) = subs.iter().position(|s| s.id == id.0) {
            let sub = subs.remove(pos);
            sub.closed.store(true, Ordering::Release);
            sub.notify.notify_one();
            true
        } else {
            false
        }
    }

    /// Publish a payload to every matching subscription, preserving
    /// publish order per subscriber.
    pub async fn publish(&self, topic: &str, payload: Value) -> BusResult<()> {
        if self.broker_required && !self.is_connected() {
            return Err(BusError::Disconnected);
        }

        let matched: Vec<Arc<Subscription>> = {
            let subs = self.subscriptions.read();
            subs.iter()
                .filter(|s| s.pattern.matches(topic))
                .cloned()
                .collect()
        };

        trace!(topic, subscribers = matched.len(), "publishing");
        for sub in &matched {
            sub.enqueue(topic.to_string(), payload.clone());
        }

        if let Some(broker) = &self.broker {
            if self.is_connected() {
                let serialized = serde_json::to_string(&payload)?;
                if let Err(e) = broker.publish(topic, &serialized).await {
                    warn!(topic, error = %e, "broker publish failed");
                    self.broker_connected.store(false, Ordering::Release);
                    if self.broker_required {
                        return Err(BusError::Disconnected);
                    }
                }
            }
        }

        Ok(())
    }

    /// Publish a typed event on its canonical topic.
    pub async fn publish_event<E: BusEvent>(&self, event: &E) -> BusResult<()> {
        self.publish(&event.topic(), event.payload()).await
    }

    /// Number of live subscriptions (for health reporting).
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }
}

async fn deliver_loop(subscription: Arc<Subscription>, handler: Handler) {
    loop {
        let next = subscription.queue.lock().pop_front();
        match next {
            Some((topic, payload)) => {
                if let Err(e) = handler(topic.clone(), payload).await {
                    warn!(
                        topic,
                        pattern = %subscription.pattern,
                        error = %e,
                        "event handler failed"
                    );
                }
            }
            None => {
                if subscription.closed.load(Ordering::Acquire) {
                    break;
                }
                subscription.notify.notified().await;
            }
        }
    }
    trace!(pattern = %subscription.pattern, "delivery task exited");
}
