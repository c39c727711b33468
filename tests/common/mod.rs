//! Shared harness for event streaming integration tests.
//!
//! Spins up real gRPC servers on loopback and drives them through real
//! client streams, with both servers sharing one account store and one
//! rendezvous store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::Utc;
use prost_types::Timestamp;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::transport::{Channel, Server};
use tonic::{Code, Streaming};

use flipcash_events::account;
use flipcash_events::auth::{AccountAuthorizer, Authorizer, KeyPairAuthenticator};
use flipcash_events::config::StreamConfig;
use flipcash_events::event::Store as RendezvousStore;
use flipcash_events::event::{EventStreamServer, StoreError};
use flipcash_events::model::KeyPair;
use flipcash_events::proto::common::UserId;
use flipcash_events::proto::event::event_streaming_client::EventStreamingClient;
use flipcash_events::proto::event::event_streaming_server::EventStreamingServer;
use flipcash_events::proto::event::{
    event, stream_events_request, stream_events_response, ClientPong, Event, StreamEventsRequest,
    StreamEventsResponse, TestEvent,
};
use flipcash_events::proto_ext::{generate_event_id, UserIdExt};
use flipcash_events::Bus;

const INTERNAL_API_KEY: &str = "valid-api-key";

pub struct TestEnv {
    pub client1: ClientTestEnv,
    pub client2: ClientTestEnv,
    pub server1: ServerTestEnv,
    pub server2: ServerTestEnv,
}

pub struct ServerTestEnv {
    pub address: String,
    pub events: Arc<dyn RendezvousStore>,
    pub event_bus: Arc<Bus<UserId, Event>>,
}

pub struct ClientTestEnv {
    client: EventStreamingClient<Channel>,
    streams: HashMap<String, Vec<ClientStream>>,
}

struct ClientStream {
    tx: mpsc::Sender<StreamEventsRequest>,
    rx: Streaming<StreamEventsResponse>,
}

/// Start two servers sharing the given stores. When `multi_server` is
/// false both clients talk to server 1, mirroring a single-node setup.
pub async fn setup_test(
    accounts: Arc<dyn account::Store>,
    events: Arc<dyn RendezvousStore>,
    multi_server: bool,
) -> TestEnv {
    let authz: Arc<dyn Authorizer> = Arc::new(AccountAuthorizer::new(
        accounts.clone(),
        Arc::new(KeyPairAuthenticator::new()),
    ));

    let server1 = start_server(authz.clone(), accounts.clone(), events.clone()).await;
    let server2 = start_server(authz, accounts, events).await;

    let channel1 = connect(&server1.address).await;
    let channel2 = connect(&server2.address).await;

    let client1 = ClientTestEnv {
        client: EventStreamingClient::new(channel1.clone()),
        streams: HashMap::new(),
    };
    let client2 = ClientTestEnv {
        client: EventStreamingClient::new(if multi_server { channel2 } else { channel1 }),
        streams: HashMap::new(),
    };

    TestEnv {
        client1,
        client2,
        server1,
        server2,
    }
}

async fn start_server(
    authz: Arc<dyn Authorizer>,
    accounts: Arc<dyn account::Store>,
    events: Arc<dyn RendezvousStore>,
) -> ServerTestEnv {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let address = listener
        .local_addr()
        .expect("missing listener address")
        .to_string();

    let event_bus = Arc::new(Bus::new());
    let server = EventStreamServer::new(
        authz,
        accounts,
        events.clone(),
        &event_bus,
        Vec::new(),
        StreamConfig {
            broadcast_address: address.clone(),
            current_internal_api_key: INTERNAL_API_KEY.to_string(),
            ..StreamConfig::default()
        },
    );

    tokio::spawn(async move {
        Server::builder()
            .add_service(EventStreamingServer::new(server))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .expect("test server failed");
    });

    ServerTestEnv {
        address,
        events,
        event_bus,
    }
}

async fn connect(address: &str) -> Channel {
    Channel::from_shared(format!("http://{address}"))
        .expect("invalid test server address")
        .connect()
        .await
        .expect("failed to connect to test server")
}

impl ServerTestEnv {
    /// Publish a test event for the user on this server's bus.
    pub fn send_test_user_event(&self, user_id: &UserId) -> Event {
        let event = Event {
            id: Some(generate_event_id()),
            ts: Some(Timestamp::from(SystemTime::now())),
            r#type: Some(event::Type::Test(TestEvent {
                hops: vec![self.address.clone()],
                nonce: rand::random(),
            })),
        };
        self.event_bus.publish(user_id.clone(), event.clone());
        event
    }

    pub async fn assert_rendezvous_record_exists(&self, user_id: &UserId) {
        let rendezvous = self
            .events
            .get_rendezvous(&user_id.stream_key())
            .await
            .expect("expected rendezvous record");
        assert_eq!(rendezvous.address, self.address);
        assert!(rendezvous.expires_at > Utc::now());
    }

    pub async fn assert_no_rendezvous_record(&self, user_id: &UserId) {
        let err = self
            .events
            .get_rendezvous(&user_id.stream_key())
            .await
            .expect_err("expected no rendezvous record");
        assert!(matches!(err, StoreError::RendezvousNotFound));
    }
}

impl ClientTestEnv {
    /// Open a signed event stream for the user.
    pub async fn open_user_event_stream(&mut self, user_id: &UserId, key_pair: &KeyPair) {
        let key = user_id.stream_key();

        let mut params = stream_events_request::Params {
            ts: Some(Timestamp::from(SystemTime::now())),
            auth: None,
        };
        params.auth = Some(key_pair.sign(&params));

        let (tx, rx) = mpsc::channel(4);
        tx.send(StreamEventsRequest {
            r#type: Some(stream_events_request::Type::Params(params)),
        })
        .await
        .expect("failed to queue params frame");

        let response = self
            .client
            .stream_events(ReceiverStream::new(rx))
            .await
            .expect("failed to open stream");

        self.streams.entry(key).or_default().push(ClientStream {
            tx,
            rx: response.into_inner(),
        });
    }

    /// Read until a batch of events arrives on any of the user's open
    /// streams, answering pings along the way. Terminated streams are
    /// skipped; returns empty when every stream has terminated.
    pub async fn receive_events_in_real_time(&mut self, user_id: &UserId) -> Vec<Event> {
        let key = user_id.stream_key();
        let streams = self.streams.get_mut(&key).expect("no open streams");

        for stream in streams.iter_mut() {
            loop {
                let message = tokio::time::timeout(Duration::from_secs(10), stream.rx.message())
                    .await
                    .expect("timed out waiting for stream frame");

                let response = match message {
                    Ok(Some(response)) => response,
                    Ok(None) => break,
                    Err(status) if status.code() == Code::Aborted => break,
                    Err(status) => panic!("stream error: {status}"),
                };

                match response.r#type {
                    Some(stream_events_response::Type::Events(batch)) => return batch.events,
                    Some(stream_events_response::Type::Ping(_)) => {
                        // Terminated streams reject the pong; that's fine
                        let _ = stream.tx.send(pong_frame()).await;
                    }
                    Some(stream_events_response::Type::Error(error)) => {
                        panic!("stream result code {:?}", error.code());
                    }
                    None => panic!("events, ping or error wasn't set"),
                }
            }
        }

        Vec::new()
    }

    /// Consume the user's single stream until it terminates or `timeout`
    /// elapses, optionally answering pings. Returns the ping count.
    pub async fn wait_until_stream_termination_or_timeout(
        &mut self,
        user_id: &UserId,
        keep_stream_alive: bool,
        timeout: Duration,
    ) -> usize {
        let key = user_id.stream_key();
        let streams = self.streams.get_mut(&key).expect("no open streams");
        assert_eq!(streams.len(), 1);
        let stream = &mut streams[0];

        let mut ping_count = 0;
        let start = Instant::now();
        loop {
            let message = tokio::time::timeout(timeout * 2, stream.rx.message())
                .await
                .expect("timed out waiting for stream frame");

            let response = match message {
                Ok(Some(response)) => response,
                Ok(None) => return ping_count,
                Err(status) if status.code() == Code::Aborted => return ping_count,
                Err(status) => panic!("stream error: {status}"),
            };

            match response.r#type {
                Some(stream_events_response::Type::Ping(_)) => {
                    ping_count += 1;

                    if keep_stream_alive {
                        stream
                            .tx
                            .send(pong_frame())
                            .await
                            .expect("failed to send pong");
                    }

                    if start.elapsed() > timeout {
                        return ping_count;
                    }
                }
                Some(stream_events_response::Type::Events(_)) => {}
                Some(stream_events_response::Type::Error(error)) => {
                    panic!("stream result code {:?}", error.code());
                }
                None => panic!("events, ping or error wasn't set"),
            }
        }
    }

    /// Drop all of the user's open streams, disconnecting client side.
    pub fn close_user_event_stream(&mut self, user_id: &UserId) {
        self.streams.remove(&user_id.stream_key());
    }
}

fn pong_frame() -> StreamEventsRequest {
    StreamEventsRequest {
        r#type: Some(stream_events_request::Type::Pong(ClientPong {
            timestamp: Some(Timestamp::from(SystemTime::now())),
        })),
    }
}

/// Compare events modulo forwarding hops.
pub fn assert_equivalent_test_events(expected: &Event, actual: &Event) {
    let mut expected = expected.clone();
    let mut actual = actual.clone();
    if let Some(event::Type::Test(test)) = expected.r#type.as_mut() {
        test.hops.clear();
    }
    if let Some(event::Type::Test(test)) = actual.r#type.as_mut() {
        test.hops.clear();
    }
    assert_eq!(expected, actual);
}
