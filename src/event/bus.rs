//! Event notification system for the runtime
//!
//! Topic-based publish/subscribe fan-out. The loader and registry publish
//! lifecycle transitions here; modules subscribe through their declared
//! event-handler maps.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::utils::current_timestamp_ms;

/// A published event: topic plus a JSON payload.
#[derive(Debug, Clone)]
pub struct Event {
    /// Topic string (e.g. "module:activated", "module:palette:state-changed")
    pub topic: String,
    /// Structured payload
    pub payload: Value,
    /// Publication time (unix milliseconds)
    pub timestamp: u64,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            timestamp: current_timestamp_ms(),
        }
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

/// Async event callback.
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as an [`EventHandler`].
pub fn handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

struct Subscriber {
    id: SubscriptionId,
    handler: EventHandler,
}

/// Publish/subscribe event bus.
///
/// Handlers for a topic are invoked in subscription order and awaited one at
/// a time; delivery is cooperative, there is no background task. The
/// subscriber table lock is never held across a handler await.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl EventBus {
    /// Create a new event bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to a topic.
    pub fn subscribe(&self, topic: impl Into<String>, handler: EventHandler) -> SubscriptionId {
        let topic = topic.into();
        let id = SubscriptionId(Uuid::new_v4());
        let mut subscribers = self.subscribers.write().expect("subscriber lock poisoned");
        subscribers
            .entry(topic.clone())
            .or_default()
            .push(Subscriber { id, handler });
        debug!("Subscribed {:?} to topic {}", id, topic);
        id
    }

    /// Remove a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.subscribers.write().expect("subscriber lock poisoned");
        for list in subscribers.values_mut() {
            list.retain(|s| s.id != id);
        }
        subscribers.retain(|_, list| !list.is_empty());
    }

    /// Publish an event to every handler subscribed to its topic.
    pub async fn publish(&self, event: Event) {
        // Snapshot handlers before awaiting so the lock is not held across
        // handler execution (handlers may publish or subscribe themselves).
        let handlers: Vec<EventHandler> = {
            let subscribers = self.subscribers.read().expect("subscriber lock poisoned");
            subscribers
                .get(&event.topic)
                .map(|list| list.iter().map(|s| Arc::clone(&s.handler)).collect())
                .unwrap_or_default()
        };

        if handlers.is_empty() {
            return;
        }

        debug!(
            "Publishing event {} to {} subscriber(s)",
            event.topic,
            handlers.len()
        );
        for handler in handlers {
            handler(event.clone()).await;
        }
    }

    /// Convenience: publish a topic with a payload, stamping the timestamp.
    pub async fn emit(&self, topic: impl Into<String>, payload: Value) {
        self.publish(Event::new(topic, payload)).await;
    }

    /// Number of handlers currently subscribed to a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let subscribers = self.subscribers.read().expect("subscriber lock poisoned");
        subscribers.get(topic).map(Vec::len).unwrap_or(0)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscribers = self.subscribers.read().expect("subscriber lock poisoned");
        f.debug_struct("EventBus")
            .field("topics", &subscribers.len())
            .finish()
    }
}

/// Well-known lifecycle topics.
pub mod topics {
    /// A module reached `Active`.
    pub const MODULE_ACTIVATED: &str = "module:activated";
    /// A module left `Active`.
    pub const MODULE_DEACTIVATED: &str = "module:deactivated";
    /// A module was fully unloaded.
    pub const MODULE_UNLOADED: &str = "module:unloaded";

    /// Module-scoped topic: `module:<name>:<suffix>`.
    ///
    /// Suffixes used by the runtime: `initialized`, `activated`, `deactivated`,
    /// `disposed`, `error`; modules themselves emit `state-changed` and
    /// `config-changed` through their context.
    pub fn module_scoped(name: &str, suffix: &str) -> String {
        format!("module:{}:{}", name, suffix)
    }
}
