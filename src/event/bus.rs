//! In-process event bus.
//!
//! Publish point for user events inside one server process. Handlers are
//! installed at start-up and never removed; each publish dispatches every
//! handler on its own task, so publishers never block on delivery and
//! never observe handler failures.

use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

/// Receives events published on a [`Bus`].
#[async_trait]
pub trait Handler<K, E>: Send + Sync {
    async fn on_event(&self, key: K, event: E);
}

/// Adapter to allow the use of ordinary async functions as [`Handler`]s.
pub struct HandlerFunc<F>(pub F);

#[async_trait]
impl<K, E, F, Fut> Handler<K, E> for HandlerFunc<F>
where
    K: Send + 'static,
    E: Send + 'static,
    F: Fn(K, E) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn on_event(&self, key: K, event: E) {
        (self.0)(key, event).await;
    }
}

/// Typed in-process publish point.
pub struct Bus<K, E> {
    handlers: RwLock<Vec<Arc<dyn Handler<K, E>>>>,
}

impl<K, E> Bus<K, E>
where
    K: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Create a new bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register a handler. Registration is append-only.
    pub fn add_handler(&self, handler: Arc<dyn Handler<K, E>>) {
        self.handlers
            .write()
            .expect("bus lock poisoned")
            .push(handler);
    }

    /// Publish an event to all registered handlers.
    ///
    /// Handlers run on independent tasks; dispatch order across handlers
    /// is unspecified and errors are invisible to the publisher.
    pub fn publish(&self, key: K, event: E) {
        // Snapshot under the read lock, dispatch outside it
        let handlers: Vec<_> = self
            .handlers
            .read()
            .expect("bus lock poisoned")
            .iter()
            .cloned()
            .collect();

        for handler in handlers {
            let key = key.clone();
            let event = event.clone();
            tokio::spawn(async move {
                handler.on_event(key, event).await;
            });
        }
    }
}

impl<K, E> Default for Bus<K, E>
where
    K: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
