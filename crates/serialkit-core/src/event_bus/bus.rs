//! Event Bus implementation.
//!
//! Provides the core EventBus struct. The bus is a cheap cloneable handle;
//! every component that publishes or subscribes receives a clone from
//! whoever wires the session together.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::{BusEvent, Topic};

/// Subscription identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new unique subscription ID
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Type alias for event handler functions
type EventHandler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// Configuration for the event bus
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for broadcast.
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

struct Subscriber {
    id: SubscriptionId,
    handler: EventHandler,
    once: bool,
}

struct BusInner {
    /// Broadcast channel sender for async receivers
    sender: broadcast::Sender<BusEvent>,
    /// Synchronous subscribers per topic, in subscription order
    topics: RwLock<HashMap<Topic, Vec<Subscriber>>>,
    config: EventBusConfig,
}

impl BusInner {
    fn is_subscribed(&self, topic: Topic, id: SubscriptionId) -> bool {
        self.topics
            .read()
            .get(&topic)
            .is_some_and(|subscribers| subscribers.iter().any(|s| s.id == id))
    }

    fn remove(&self, topic: Topic, id: SubscriptionId) -> bool {
        let mut topics = self.topics.write();
        let Some(subscribers) = topics.get_mut(&topic) else {
            return false;
        };

        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            topics.remove(&topic);
        }
        if removed {
            tracing::debug!("Subscription {} on {} removed", id, topic);
        }
        removed
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Subscription identifier
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Topic this subscription listens on
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Remove this subscription from its bus.
    ///
    /// Returns false if it was already gone (delivered once, cleared, or the
    /// bus was dropped).
    pub fn unsubscribe(&self) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.remove(self.topic, self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

/// Topic based publish/subscribe bus
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a new event bus with default configuration
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a new event bus with custom configuration
    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self {
            inner: Arc::new(BusInner {
                sender,
                topics: RwLock::new(HashMap::new()),
                config,
            }),
        }
    }

    /// Publish an event to every subscriber of its topic.
    ///
    /// Handlers run synchronously on the calling thread in subscription
    /// order. One-shot subscriptions are detached as part of this delivery,
    /// so they never see a second event even if a handler publishes again.
    /// A subscription removed by an earlier handler of the same delivery is
    /// skipped; one added during delivery first sees the next event.
    /// Returns the number of handlers invoked; zero is not an error.
    pub fn publish(&self, event: BusEvent) -> usize {
        let topic = event.topic();

        let handlers: Vec<(SubscriptionId, EventHandler, bool)> = {
            let mut topics = self.inner.topics.write();
            match topics.get_mut(&topic) {
                Some(subscribers) => {
                    let handlers = subscribers
                        .iter()
                        .map(|s| (s.id, s.handler.clone(), s.once))
                        .collect();
                    subscribers.retain(|s| !s.once);
                    if subscribers.is_empty() {
                        topics.remove(&topic);
                    }
                    handlers
                }
                None => Vec::new(),
            }
        };

        // Lock released: handlers may subscribe, unsubscribe or publish.
        let mut delivered = 0;
        for (id, handler, once) in &handlers {
            // One-shot entries were claimed above and are no longer listed
            if !once && !self.inner.is_subscribed(topic, *id) {
                continue;
            }
            handler(&event);
            delivered += 1;
        }

        // No async receivers is fine.
        let _ = self.inner.sender.send(event);

        delivered
    }

    /// Subscribe to a topic with a synchronous handler
    ///
    /// The handler will be called on the publishing thread, so it should
    /// return quickly to avoid blocking event dispatch.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        self.subscribe_with(topic, handler, false)
    }

    /// Subscribe for a single delivery
    pub fn subscribe_once<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        self.subscribe_with(topic, handler, true)
    }

    /// Subscribe with an explicit `once` flag
    pub fn subscribe_with<F>(&self, topic: Topic, handler: F, once: bool) -> Subscription
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.inner
            .topics
            .write()
            .entry(topic)
            .or_default()
            .push(Subscriber {
                id,
                handler: Arc::new(handler),
                once,
            });
        tracing::debug!("Subscription {} on {} added", id, topic);

        Subscription {
            id,
            topic,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove one subscription. Returns true if it was found.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.inner.remove(subscription.topic, subscription.id)
    }

    /// Remove every subscription on a topic, returning how many were removed
    pub fn clear_topic(&self, topic: Topic) -> usize {
        let removed = self
            .inner
            .topics
            .write()
            .remove(&topic)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0);
        if removed > 0 {
            tracing::debug!("Cleared {} subscriptions on {}", removed, topic);
        }
        removed
    }

    /// Get a receiver for manual event polling
    ///
    /// This is useful for async contexts where you want to receive events
    /// in a tokio task.
    pub fn receiver(&self) -> broadcast::Receiver<BusEvent> {
        self.inner.sender.subscribe()
    }

    /// Number of subscriptions on one topic
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner
            .topics
            .read()
            .get(&topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Number of topics with at least one subscription
    pub fn topic_count(&self) -> usize {
        self.inner.topics.read().len()
    }

    /// Get the current configuration
    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.topic_count())
            .field("config", &self.inner.config)
            .finish()
    }
}
