//! Bidirectional event stream endpoint.
//!
//! One `StreamEvents` session per connected user: the server authorizes
//! the caller, claims the user's rendezvous lease, then multiplexes
//! outbound batches, lease refreshes, pings and liveness signals until a
//! terminal condition tears the session down. `ForwardEvents` is the
//! internal surface other servers use to route events here.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::Stream;
use prost::Message;
use prost_types::Timestamp;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::account;
use crate::auth::Authorizer;
use crate::config::StreamConfig;
use crate::proto::common::UserId;
use crate::proto::event::event_streaming_server::EventStreaming;
use crate::proto::event::{
    event, forward_events_response, stream_events_request, stream_events_response,
    Event, EventBatch, ForwardEventsRequest, ForwardEventsResponse, ServerPing,
    StreamEventsRequest, StreamEventsResponse,
};
use crate::proto_ext::{bounded_receive, monitor_stream_health, EventIdExt, UserIdExt};

use super::bus::Bus;
use super::client::ForwardingClientPool;
use super::filter::{StaleEventDetector, StaleEventDetectorCtor};
use super::forwarder::{EventForwarder, Forwarder};
use super::model::Rendezvous;
use super::store::{Store, StoreError};
use super::stream::{EventStreamReceiver, ProtoEventStream, StreamRegistry, Transform};
use super::INTERNAL_RPC_API_KEY_HEADER;

const FIRST_FRAME_TIMEOUT: Duration = Duration::from_millis(250);
const RENDEZVOUS_DELETE_TIMEOUT: Duration = Duration::from_millis(250);
const INIT_TS_WINDOW_SECS: i64 = 120;
const OUTBOUND_BUFFER: usize = 32;

// Bounds re-forwarding when two servers briefly disagree about stream
// ownership.
const MAX_FORWARD_HOPS: usize = 8;

/// Event streaming gRPC service.
#[derive(Clone)]
pub struct EventStreamServer {
    authz: Arc<dyn Authorizer>,
    accounts: Arc<dyn account::Store>,
    events: Arc<dyn Store>,

    streams: Arc<StreamRegistry>,
    forwarder: EventForwarder,
    stale_event_detector_ctors: Arc<Vec<StaleEventDetectorCtor>>,

    accepted_api_keys: Arc<HashSet<String>>,
    config: StreamConfig,
}

impl EventStreamServer {
    /// Create the server and register its forwarder on the event bus.
    pub fn new(
        authz: Arc<dyn Authorizer>,
        accounts: Arc<dyn account::Store>,
        events: Arc<dyn Store>,
        event_bus: &Bus<UserId, Event>,
        stale_event_detector_ctors: Vec<StaleEventDetectorCtor>,
        config: StreamConfig,
    ) -> Self {
        let streams = Arc::new(StreamRegistry::new());
        let forwarder = EventForwarder::with_local_streams(
            events.clone(),
            ForwardingClientPool::new(),
            streams.clone(),
            config.clone(),
        );

        let mut accepted_api_keys: HashSet<String> =
            config.accepted_internal_api_keys.iter().cloned().collect();
        accepted_api_keys.insert(config.current_internal_api_key.clone());

        event_bus.add_handler(Arc::new(forwarder.clone()));

        Self {
            authz,
            accounts,
            events,
            streams,
            forwarder,
            stale_event_detector_ctors: Arc::new(stale_event_detector_ctors),
            accepted_api_keys: Arc::new(accepted_api_keys),
            config,
        }
    }

    fn batch_transform(&self, stream_key: String) -> Transform<Event, EventBatch> {
        let mut detectors: Vec<Box<dyn StaleEventDetector>> = self
            .stale_event_detector_ctors
            .iter()
            .map(|ctor| ctor())
            .collect();
        let max_batch_size = self.config.max_batch_size;

        Box::new(move |events| {
            if events.len() > max_batch_size {
                warn!(user_id = %stream_key, "Event batch size exceeds proto limit");
                return None;
            }

            if events.is_empty() {
                return None;
            }

            let mut events_to_send = Vec::with_capacity(events.len());
            for event in events {
                let is_dropped = detectors
                    .iter_mut()
                    .any(|detector| detector.should_drop(&event));
                if is_dropped {
                    let event_id = event
                        .id
                        .as_ref()
                        .map(|id| id.to_hex())
                        .unwrap_or_default();
                    debug!(user_id = %stream_key, event_id = %event_id, "Dropping stale event");
                    continue;
                }

                events_to_send.push(event);
            }

            if events_to_send.is_empty() {
                return None;
            }
            Some(EventBatch {
                events: events_to_send,
            })
        })
    }

    async fn serve_session(
        &self,
        tx: &mpsc::Sender<Result<StreamEventsResponse, Status>>,
        stream_key: &str,
        mut receiver: EventStreamReceiver<Event, EventBatch>,
        mut health_rx: mpsc::Receiver<()>,
    ) -> Result<(), Status> {
        // Sanity check the client is still there before store writes
        if tx.is_closed() {
            debug!("Stream cancelled; ending stream");
            return Err(Status::cancelled(""));
        }

        // Let other servers know where to find the active stream
        let rendezvous = Rendezvous {
            key: stream_key.to_string(),
            address: self.config.broadcast_address.clone(),
            expires_at: self.lease_expiry(),
        };
        match self.events.create_rendezvous(&rendezvous).await {
            Ok(()) => {}
            Err(StoreError::RendezvousExists) => {
                warn!("Existing stream detected on another server; aborting");
                return Err(Status::aborted("stream already exists"));
            }
            Err(err) => {
                warn!(error = %err, "Failure saving rendezvous record");
                return Err(Status::internal("failure saving rendezvous record"));
            }
        }

        let mut refresh = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.refresh_interval(),
            self.config.refresh_interval(),
        );
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // First ping goes out immediately
        let mut ping = tokio::time::interval(self.config.ping_delay());
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                batch = receiver.recv() => {
                    let Some(batch) = batch else {
                        debug!("Stream closed; ending stream");
                        return Err(Status::aborted("stream closed"));
                    };

                    debug!("Sending events to client stream");
                    let response = StreamEventsResponse {
                        r#type: Some(stream_events_response::Type::Events(batch)),
                    };
                    if tx.send(Ok(response)).await.is_err() {
                        info!("Failed to send events to client stream");
                        return Err(Status::cancelled(""));
                    }
                }
                _ = refresh.tick() => {
                    debug!("Refreshing rendezvous record");

                    let result = self
                        .events
                        .extend_rendezvous_expiry(
                            stream_key,
                            &self.config.broadcast_address,
                            self.lease_expiry(),
                        )
                        .await;
                    match result {
                        Ok(()) => {}
                        Err(StoreError::RendezvousNotFound) => {
                            warn!("Existing stream detected on another server; aborting");
                            return Err(Status::aborted("stream already exists"));
                        }
                        Err(err) => {
                            warn!(error = %err, "Failure extending rendezvous record expiry");
                            return Err(Status::internal(
                                "failure extending rendezvous record expiry",
                            ));
                        }
                    }
                }
                _ = ping.tick() => {
                    debug!("Sending ping to client");

                    let response = StreamEventsResponse {
                        r#type: Some(stream_events_response::Type::Ping(ServerPing {
                            timestamp: Some(now_timestamp()),
                            ping_delay: Some(prost_types::Duration {
                                seconds: self.config.ping_delay().as_secs() as i64,
                                nanos: self.config.ping_delay().subsec_nanos() as i32,
                            }),
                        })),
                    };
                    if tx.send(Ok(response)).await.is_err() {
                        debug!("Stream is unhealthy; aborting");
                        return Err(Status::aborted("terminating unhealthy stream"));
                    }
                }
                _ = health_rx.recv() => {
                    debug!("Stream is unhealthy; aborting");
                    return Err(Status::aborted("terminating unhealthy stream"));
                }
                _ = tx.closed() => {
                    debug!("Stream cancelled; ending stream");
                    return Err(Status::cancelled(""));
                }
            }
        }
    }

    fn lease_expiry(&self) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::milliseconds(self.config.rendezvous_ttl_ms as i64)
    }
}

fn now_timestamp() -> Timestamp {
    let now = Utc::now();
    Timestamp {
        seconds: now.timestamp(),
        nanos: now.timestamp_subsec_nanos() as i32,
    }
}

fn error_frame(code: stream_events_response::stream_error::Code) -> StreamEventsResponse {
    StreamEventsResponse {
        r#type: Some(stream_events_response::Type::Error(
            stream_events_response::StreamError { code: code as i32 },
        )),
    }
}

type ResponseStream = Pin<Box<dyn Stream<Item = Result<StreamEventsResponse, Status>> + Send>>;

/// A response stream that emits one frame and closes.
fn one_shot(frame: StreamEventsResponse) -> ResponseStream {
    Box::pin(tokio_stream::once(Ok(frame)))
}

#[tonic::async_trait]
impl EventStreaming for EventStreamServer {
    type StreamEventsStream = ResponseStream;

    async fn stream_events(
        &self,
        request: Request<Streaming<StreamEventsRequest>>,
    ) -> Result<Response<Self::StreamEventsStream>, Status> {
        let mut inbound = request.into_inner();

        let first = bounded_receive(&mut inbound, FIRST_FRAME_TIMEOUT).await?;
        let Some(stream_events_request::Type::Params(params)) = first.r#type else {
            return Err(Status::invalid_argument("missing parameters"));
        };

        let client_ts = params
            .ts
            .as_ref()
            .and_then(|ts| DateTime::from_timestamp(ts.seconds, ts.nanos as u32))
            .unwrap_or(DateTime::UNIX_EPOCH);
        if (Utc::now() - client_ts).abs() > ChronoDuration::seconds(INIT_TS_WINDOW_SECS) {
            return Ok(Response::new(one_shot(error_frame(
                stream_events_response::stream_error::Code::InvalidTimestamp,
            ))));
        }

        let mut unsigned = params.clone();
        let auth = unsigned
            .auth
            .take()
            .ok_or_else(|| Status::invalid_argument("missing auth"))?;
        let user_id = self.authz.authorize(&unsigned.encode_to_vec(), &auth).await?;

        let stream_key = user_id.stream_key();

        let is_registered = self.accounts.is_registered(&user_id).await.map_err(|err| {
            warn!(user_id = %stream_key, error = %err, "Failure getting registration flag");
            Status::internal("failure getting registration flag")
        })?;
        if !is_registered {
            return Ok(Response::new(one_shot(error_frame(
                stream_events_response::stream_error::Code::Denied,
            ))));
        }

        let stream_id = Uuid::new_v4();
        let span = info_span!("event_stream", user_id = %stream_key, stream_id = %stream_id);

        let (stream, receiver) = ProtoEventStream::new(
            self.config.stream_buffer_size,
            self.batch_transform(stream_key.clone()),
        );

        let (session_lock, replaced) = self.streams.install(&stream_key, stream.clone());
        if replaced {
            info!(user_id = %stream_key, stream_id = %stream_id, "Closed previous stream");
        }

        debug!(user_id = %stream_key, stream_id = %stream_id, "Initializing stream");

        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);

        let health_rx = monitor_stream_health(
            inbound,
            self.config.ping_delay() * 2,
            |frame: &StreamEventsRequest| {
                matches!(frame.r#type, Some(stream_events_request::Type::Pong(_)))
            },
        );

        let server = self.clone();
        tokio::spawn(
            async move {
                // Serialize against the previous session's teardown
                let _session_guard = session_lock.lock_owned().await;

                let result = server
                    .serve_session(&tx, &stream_key, receiver, health_rx)
                    .await;
                if let Err(status) = result {
                    let _ = tx.send(Err(status)).await;
                }

                debug!("Closing streamer");

                server.streams.remove_if_current(&stream_key, &stream);

                let delete = tokio::time::timeout(
                    RENDEZVOUS_DELETE_TIMEOUT,
                    server
                        .events
                        .delete_rendezvous(&stream_key, &server.config.broadcast_address),
                )
                .await;
                match delete {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(error = %err, "Failed to cleanup rendezvous record");
                    }
                    Err(_) => warn!("Timed out cleaning up rendezvous record"),
                }
            }
            .instrument(span),
        );

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn forward_events(
        &self,
        request: Request<ForwardEventsRequest>,
    ) -> Result<Response<ForwardEventsResponse>, Status> {
        let api_key = request
            .metadata()
            .get(INTERNAL_RPC_API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let Some(api_key) = api_key else {
            warn!("Failure getting RPC API key header");
            return Err(Status::internal(""));
        };
        if !self.accepted_api_keys.contains(&api_key) {
            return Ok(Response::new(ForwardEventsResponse {
                result: forward_events_response::Result::Denied as i32,
            }));
        }

        let user_events = request
            .into_inner()
            .user_events
            .map(|batch| batch.events)
            .unwrap_or_default();

        for mut user_event in user_events {
            let event_id = user_event
                .event
                .as_ref()
                .and_then(|e| e.id.as_ref())
                .map(|id| id.to_hex())
                .unwrap_or_default();

            if let Some(event::Type::Test(test)) = user_event
                .event
                .as_mut()
                .and_then(|e| e.r#type.as_mut())
            {
                if test.hops.len() >= MAX_FORWARD_HOPS {
                    warn!(event_id = %event_id, "Dropping event exceeding forward hop limit");
                    continue;
                }
                test.hops.push(self.config.broadcast_address.clone());
            }

            debug!(event_id = %event_id, "Re-forwarding received event");
            self.forwarder.forward_user_events(vec![user_event]);
        }

        Ok(Response::new(ForwardEventsResponse {
            result: forward_events_response::Result::Ok as i32,
        }))
    }
}
