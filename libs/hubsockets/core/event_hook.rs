//! Multi-subscriber async notification primitive
//!
//! An [`EventHook`] holds an ordered list of async subscribers. `fire`
//! awaits every subscriber in subscription order with a clone of the same
//! argument. A subscriber that returns an error or panics is logged and
//! skipped; the remaining subscribers still run and `fire` itself never
//! fails.

use crate::error::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

type Subscriber<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Handle returned by [`EventHook::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Ordered set of async subscribers
pub struct EventHook<T> {
    name: &'static str,
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber<T>)>>,
}

impl<T> EventHook<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(0),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Append a subscriber
    pub fn subscribe<F, Fut>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscriber: Subscriber<T> = Arc::new(move |arg| handler(arg).boxed());
        self.subscribers.write().push((id, subscriber));
        id
    }

    /// Remove a subscriber; returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Invoke every current subscriber sequentially
    ///
    /// The subscriber list is snapshotted first, so subscribers may
    /// (un)subscribe from inside their own callback without deadlocking.
    pub async fn fire(&self, arg: T) {
        let snapshot: Vec<(SubscriptionId, Subscriber<T>)> = self.subscribers.read().clone();
        trace!(hook = self.name, subscribers = snapshot.len(), "Firing event hook");

        for (id, subscriber) in snapshot {
            let outcome = AssertUnwindSafe(subscriber(arg.clone())).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(hook = self.name, subscriber = id.0, "Subscriber failed: {}", e);
                }
                Err(_) => {
                    error!(hook = self.name, subscriber = id.0, "Subscriber panicked");
                }
            }
        }
    }
}

impl<T> std::fmt::Debug for EventHook<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHook")
            .field("name", &self.name)
            .field("subscribers", &self.subscribers.read().len())
            .finish()
    }
}
