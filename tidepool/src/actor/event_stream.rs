//! Process-wide typed publish/subscribe.
//!
//! Subscribers register for one concrete event type. Publishing clones the
//! matching handlers out of the lock before calling them, so a handler may
//! publish or subscribe without deadlocking.

use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

type Handler = Arc<dyn Fn(&dyn Any) + Send + Sync>;

struct Entry {
    id: u64,
    type_id: TypeId,
    handler: Handler,
}

/// Handle returned by [`EventStream::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
}

/// Typed event bus shared by everything in one actor system.
#[derive(Default)]
pub struct EventStream {
    entries: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl EventStream {
    /// Create an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `handler` for every published `T`.
    pub fn subscribe<T, F>(&self, handler: F) -> Subscription
    where
        T: Any,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handler: Handler = Arc::new(move |event: &dyn Any| {
            if let Some(event) = event.downcast_ref::<T>() {
                handler(event);
            }
        });
        self.entries.write().push(Entry {
            id,
            type_id: TypeId::of::<T>(),
            handler,
        });
        Subscription { id }
    }

    /// Forward every published `T` into a channel.
    ///
    /// The subscription is removed on the next publish after the receiver
    /// is dropped.
    pub fn subscribe_channel<T>(self: &Arc<Self>) -> (Subscription, mpsc::UnboundedReceiver<T>)
    where
        T: Any + Clone + Send,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = Arc::downgrade(self);
        let slot: Arc<RwLock<Option<Subscription>>> = Arc::new(RwLock::new(None));
        let own = Arc::clone(&slot);
        let subscription = self.subscribe::<T, _>(move |event| {
            if tx.send(event.clone()).is_err() {
                let subscription = *own.read();
                if let (Some(stream), Some(subscription)) = (stream.upgrade(), subscription) {
                    stream.unsubscribe(subscription);
                }
            }
        });
        *slot.write() = Some(subscription);
        (subscription, rx)
    }

    /// Remove a subscription. Unknown handles are ignored.
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.entries.write().retain(|entry| entry.id != subscription.id);
    }

    /// Deliver `event` to every current subscriber of `T`.
    pub fn publish<T: Any>(&self, event: &T) {
        let type_id = TypeId::of::<T>();
        let handlers: Vec<Handler> = self
            .entries
            .read()
            .iter()
            .filter(|entry| entry.type_id == type_id)
            .map(|entry| Arc::clone(&entry.handler))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    /// Number of live subscriptions, across all types.
    pub fn subscription_count(&self) -> usize {
        self.entries.read().len()
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}
