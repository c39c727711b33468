//! Bounded per-stream outbound channel with batch aggregation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::proto::event::Event;

/// Errors from handing events to a stream.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("stream is closed")]
    Closed,

    #[error("stream buffer is full")]
    Timeout,
}

/// Aggregation applied to each batch before it reaches the consumer.
///
/// Returning `None` drops the batch entirely.
pub type Transform<E, B> = Box<dyn FnMut(Vec<E>) -> Option<B> + Send>;

/// Producer half of a per-user outbound stream.
///
/// Bounded: when the consumer falls behind, [`notify`](Self::notify) fails
/// after its timeout rather than blocking the publisher indefinitely.
pub struct ProtoEventStream<E> {
    tx: Mutex<Option<mpsc::Sender<Vec<E>>>>,
}

impl<E: Send + 'static> ProtoEventStream<E> {
    /// Create a stream with the given buffer size and aggregation.
    ///
    /// Returns the shared producer handle and the single consumer.
    pub fn new<B>(buffer: usize, transform: Transform<E, B>) -> (Arc<Self>, EventStreamReceiver<E, B>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            EventStreamReceiver { rx, transform },
        )
    }

    /// Hand events to the consumer within `timeout`.
    pub async fn notify(&self, events: Vec<E>, timeout: Duration) -> Result<(), NotifyError> {
        let sender = self
            .tx
            .lock()
            .expect("stream lock poisoned")
            .clone()
            .ok_or(NotifyError::Closed)?;

        match sender.send_timeout(events, timeout).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(NotifyError::Timeout),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(NotifyError::Closed),
        }
    }

    /// Close the stream. Idempotent.
    ///
    /// Subsequent notifies fail; batches already queued drain to the
    /// consumer before it observes the close.
    pub fn close(&self) {
        self.tx.lock().expect("stream lock poisoned").take();
    }
}

/// Consumer half of a per-user outbound stream.
pub struct EventStreamReceiver<E, B> {
    rx: mpsc::Receiver<Vec<E>>,
    transform: Transform<E, B>,
}

impl<E, B> EventStreamReceiver<E, B> {
    /// Receive the next aggregated batch.
    ///
    /// Batches the transform drops are skipped. Returns `None` once the
    /// stream is closed and drained.
    pub async fn recv(&mut self) -> Option<B> {
        while let Some(events) = self.rx.recv().await {
            if let Some(batch) = (self.transform)(events) {
                return Some(batch);
            }
        }
        None
    }
}

#[derive(Default)]
struct RegistryInner {
    streams: HashMap<String, Arc<ProtoEventStream<Event>>>,
    // Session locks are retained for the process lifetime; cardinality is
    // bounded by distinct users that ever connected.
    session_locks: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

/// Per-process registry of live streams keyed by stream key.
///
/// Alongside each key lives a persistent session mutex serializing a new
/// session's setup against the previous session's teardown.
#[derive(Default)]
pub struct StreamRegistry {
    inner: RwLock<RegistryInner>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a stream for `key`, closing any stream it replaces.
    ///
    /// Returns the key's session lock and whether a previous stream was
    /// closed.
    pub fn install(
        &self,
        key: &str,
        stream: Arc<ProtoEventStream<Event>>,
    ) -> (Arc<tokio::sync::Mutex<()>>, bool) {
        let mut inner = self.inner.write().expect("registry lock poisoned");

        let replaced = match inner.streams.insert(key.to_string(), stream) {
            Some(existing) => {
                existing.close();
                true
            }
            None => false,
        };

        let session_lock = inner
            .session_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();

        (session_lock, replaced)
    }

    /// Remove `key`'s entry iff `stream` is still the installed one.
    ///
    /// A newer session may have replaced it, in which case the entry is
    /// left for that session to manage.
    pub fn remove_if_current(&self, key: &str, stream: &Arc<ProtoEventStream<Event>>) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner
            .streams
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, stream))
        {
            inner.streams.remove(key);
        }
    }

    /// Get the live stream for `key`.
    pub fn get(&self, key: &str) -> Option<Arc<ProtoEventStream<Event>>> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .streams
            .get(key)
            .cloned()
    }
}
