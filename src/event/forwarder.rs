//! Event forwarding to the server hosting a user's stream.
//!
//! One rendezvous lookup decides the route: no record means no active
//! subscriber and the event is dropped; a record naming this server means
//! in-process delivery; anything else is an internal RPC to the owning
//! server. Publishers never observe forwarding failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use thiserror::Error;
use tonic::Code;
use tracing::{debug, warn};

use crate::config::StreamConfig;
use crate::proto::common::UserId;
use crate::proto::event::{
    forward_events_response, Event, ForwardEventsRequest, UserEvent, UserEventBatch,
};
use crate::proto_ext::{EventIdExt, UserIdExt};

use super::bus::Handler;
use super::client::ForwardingClientPool;
use super::store::{Store, StoreError};
use super::stream::StreamRegistry;
use super::INTERNAL_RPC_API_KEY_HEADER;

/// Errors from a single forward attempt.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error("connect failure: {0}")]
    Connect(#[from] tonic::transport::Error),

    #[error("rpc failure: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("rpc forward result {0}")]
    Rejected(String),

    #[error("forward rpc timed out")]
    Timeout,

    #[error("invalid api key header")]
    InvalidHeader,
}

/// Delivers user events toward their subscribers.
pub trait Forwarder: Send + Sync {
    /// Fire-and-forget: each event is routed on its own task with retries;
    /// failures are logged, never surfaced.
    fn forward_user_events(&self, events: Vec<UserEvent>);
}

struct ForwarderInner {
    events: Arc<dyn Store>,
    pool: Arc<ForwardingClientPool>,
    /// Local stream registry; absent in publisher-only processes, which
    /// always forward over RPC.
    streams: Option<Arc<StreamRegistry>>,
    config: StreamConfig,
}

/// Rendezvous-driven forwarder.
#[derive(Clone)]
pub struct EventForwarder {
    inner: Arc<ForwarderInner>,
}

impl EventForwarder {
    /// Forwarder for publisher-only processes without local streams.
    pub fn new(
        events: Arc<dyn Store>,
        pool: Arc<ForwardingClientPool>,
        config: StreamConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ForwarderInner {
                events,
                pool,
                streams: None,
                config,
            }),
        }
    }

    /// Forwarder for a stream-hosting server: rendezvous records naming
    /// `config.broadcast_address` are delivered in process.
    pub fn with_local_streams(
        events: Arc<dyn Store>,
        pool: Arc<ForwardingClientPool>,
        streams: Arc<StreamRegistry>,
        config: StreamConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ForwarderInner {
                events,
                pool,
                streams: Some(streams),
                config,
            }),
        }
    }

    async fn forward_user_event(&self, user_event: &UserEvent) -> Result<(), ForwardError> {
        let Some(user_id) = user_event.user_id.as_ref() else {
            debug!("Dropping event without user id");
            return Ok(());
        };
        let stream_key = user_id.stream_key();

        let rendezvous = match self.inner.events.get_rendezvous(&stream_key).await {
            Ok(rendezvous) => rendezvous,
            Err(StoreError::RendezvousNotFound) => {
                debug!(user_id = %stream_key, "Dropping event without rendezvous record");
                return Ok(());
            }
            Err(err) => {
                warn!(user_id = %stream_key, error = %err, "Failed to get rendezvous record");
                return Err(err.into());
            }
        };

        // Expired record that likely wasn't cleaned up. Avoid forwarding,
        // since we expect a broken state.
        if rendezvous.expires_at <= Utc::now() {
            debug!(user_id = %stream_key, "Dropping event with expired rendezvous record");
            return Ok(());
        }

        if let Some(streams) = &self.inner.streams {
            if rendezvous.address == self.inner.config.broadcast_address {
                self.deliver_local(streams, &stream_key, user_event).await;
                return Ok(());
            }
        }

        self.deliver_remote(&rendezvous.address, &stream_key, user_event)
            .await
    }

    /// This server hosts the user's stream; no RPC required.
    async fn deliver_local(
        &self,
        streams: &StreamRegistry,
        stream_key: &str,
        user_event: &UserEvent,
    ) {
        let Some(stream) = streams.get(stream_key) else {
            debug!(user_id = %stream_key, "Dropping event without local stream");
            return;
        };
        let Some(event) = user_event.event.as_ref() else {
            return;
        };

        // Consumers stamp hops in place, so hand the stream its own copy
        let cloned = event.clone();
        if let Err(err) = stream
            .notify(vec![cloned], self.inner.config.notify_timeout())
            .await
        {
            warn!(user_id = %stream_key, error = %err, "Failed to notify event on local stream");
        }
    }

    async fn deliver_remote(
        &self,
        address: &str,
        stream_key: &str,
        user_event: &UserEvent,
    ) -> Result<(), ForwardError> {
        let pooled = self.inner.pool.get(address)?;
        let mut client = pooled.client.clone();

        let mut request = tonic::Request::new(ForwardEventsRequest {
            user_events: Some(UserEventBatch {
                events: vec![user_event.clone()],
            }),
        });
        request.metadata_mut().insert(
            INTERNAL_RPC_API_KEY_HEADER,
            self.inner
                .config
                .current_internal_api_key
                .parse()
                .map_err(|_| ForwardError::InvalidHeader)?,
        );

        debug!(user_id = %stream_key, receiver_address = %address, "Forwarding events over RPC");

        let response = match tokio::time::timeout(
            self.inner.config.forward_timeout(),
            client.forward_events(request),
        )
        .await
        {
            Ok(Ok(response)) => response.into_inner(),
            Ok(Err(status)) => {
                if status.code() == Code::Unavailable {
                    pooled.report_failure();
                }
                return Err(status.into());
            }
            Err(_) => return Err(ForwardError::Timeout),
        };

        if response.result() != forward_events_response::Result::Ok {
            return Err(ForwardError::Rejected(format!("{:?}", response.result())));
        }

        Ok(())
    }
}

impl Forwarder for EventForwarder {
    fn forward_user_events(&self, events: Vec<UserEvent>) {
        for user_event in events {
            let event_id = user_event
                .event
                .as_ref()
                .and_then(|e| e.id.as_ref())
                .map(|id| id.to_hex())
                .unwrap_or_default();

            let forwarder = self.clone();
            tokio::spawn(async move {
                let backoff = ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(100))
                    .with_max_delay(Duration::from_millis(500))
                    .with_max_times(3);

                let result = (|| async { forwarder.forward_user_event(&user_event).await })
                    .retry(backoff)
                    .notify(|err: &ForwardError, delay: Duration| {
                        debug!(error = %err, delay = ?delay, "Retrying event forward");
                    })
                    .await;

                if let Err(err) = result {
                    warn!(event_id = %event_id, error = %err, "Failure forwarding user event");
                }
            });
        }
    }
}

#[async_trait]
impl Handler<UserId, Event> for EventForwarder {
    async fn on_event(&self, user_id: UserId, event: Event) {
        self.forward_user_events(vec![UserEvent {
            user_id: Some(user_id),
            event: Some(event),
        }]);
    }
}
