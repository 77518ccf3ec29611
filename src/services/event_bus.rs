//! Typed publish/subscribe with explicit unsubscribe handles.
//!
//! Handlers are grouped by topic. A panicking handler is logged and does not
//! prevent delivery to the remaining handlers.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

/// Topic that receives every published message.
pub const ALL_TOPICS: &str = "*";

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct BusInner<T> {
    next_id: AtomicU64,
    topics: Mutex<HashMap<String, Vec<(u64, Handler<T>)>>>,
}

impl<T> BusInner<T> {
    fn remove(&self, topic: &str, id: u64) -> bool {
        let mut topics = self.topics.lock();
        let Some(handlers) = topics.get_mut(topic) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            topics.remove(topic);
        }
        removed
    }
}

/// Topic-keyed handler registry.
pub struct EventBus<T> {
    inner: Arc<BusInner<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(1),
                topics: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl<T: 'static> std::fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl<T: 'static> EventBus<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// unsubscribed or dropped.
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .topics
            .lock()
            .entry(topic.clone())
            .or_default()
            .push((id, Arc::new(handler)));

        let weak: Weak<BusInner<T>> = Arc::downgrade(&self.inner);
        Subscription {
            topic: topic.clone(),
            remover: Some(Box::new(move || {
                weak.upgrade().is_some_and(|inner| inner.remove(&topic, id))
            })),
        }
    }

    /// Deliver `message` to the handlers of `topic` and of [`ALL_TOPICS`].
    ///
    /// Returns how many handlers completed without panicking.
    pub fn publish(&self, topic: &str, message: &T) -> usize {
        let handlers: Vec<Handler<T>> = {
            let topics = self.inner.topics.lock();
            let direct = topics.get(topic).into_iter().flatten();
            let wildcard = if topic == ALL_TOPICS {
                None
            } else {
                topics.get(ALL_TOPICS)
            };
            direct
                .chain(wildcard.into_iter().flatten())
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        handlers
            .into_iter()
            .filter(|handler| {
                let delivered = catch_unwind(AssertUnwindSafe(|| handler(message))).is_ok();
                if !delivered {
                    warn!(topic, "Event handler panicked");
                }
                delivered
            })
            .count()
    }

    pub fn handler_count(&self) -> usize {
        self.inner.topics.lock().values().map(Vec::len).sum()
    }

    pub fn topic_count(&self, topic: &str) -> usize {
        self.inner.topics.lock().get(topic).map_or(0, Vec::len)
    }
}

/// Handle to a registered handler.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    topic: String,
    remover: Option<Box<dyn FnOnce() -> bool + Send + Sync>>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove the handler. Returns false if it was already gone.
    pub fn unsubscribe(mut self) -> bool {
        self.remover.take().is_some_and(|remove| remove())
    }

    /// Keep the handler registered for the lifetime of the bus.
    pub fn detach(mut self) {
        self.remover = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(remove) = self.remover.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("active", &self.remover.is_some())
            .finish()
    }
}
