//! Test helpers for observing bus traffic.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use super::bus::Handler;
use super::model::KeyAndEvent;

/// Bus handler that records every event it sees.
///
/// Register on a [`super::bus::Bus`] and use [`wait_for`](Self::wait_for)
/// to assert on asynchronous delivery.
pub struct TestEventObserver<K, E> {
    events: RwLock<Vec<KeyAndEvent<K, E>>>,
}

impl<K, E> TestEventObserver<K, E>
where
    K: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: RwLock::new(Vec::new()),
        })
    }

    /// Snapshot the observed events whose key matches the filter.
    pub fn events(&self, filter: impl Fn(&K) -> bool) -> Vec<KeyAndEvent<K, E>> {
        self.events
            .read()
            .expect("observer lock poisoned")
            .iter()
            .filter(|entry| filter(&entry.key))
            .cloned()
            .collect()
    }

    /// Wait up to 250ms for the observed events to satisfy the condition.
    pub async fn wait_for(&self, condition: impl Fn(&[KeyAndEvent<K, E>]) -> bool) -> bool {
        self.wait_for_with_timeout(Duration::from_millis(250), condition)
            .await
    }

    /// Wait up to `timeout` for the observed events to satisfy the
    /// condition. Returns false if the deadline passes first.
    pub async fn wait_for_with_timeout(
        &self,
        timeout: Duration,
        condition: impl Fn(&[KeyAndEvent<K, E>]) -> bool,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let events = self.events.read().expect("observer lock poisoned");
                if condition(&events) {
                    return true;
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Forget everything observed so far.
    pub fn reset(&self) {
        self.events
            .write()
            .expect("observer lock poisoned")
            .clear();
    }
}

#[async_trait]
impl<K, E> Handler<K, E> for TestEventObserver<K, E>
where
    K: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    async fn on_event(&self, key: K, event: E) {
        self.events
            .write()
            .expect("observer lock poisoned")
            .push(KeyAndEvent { key, event });
    }
}
