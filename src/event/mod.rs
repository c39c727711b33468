//! Real-time user-event fan-out.
//!
//! A user's mobile client holds one long-lived bidirectional stream to
//! whichever server it reached. A rendezvous record in the shared store
//! names that server, and every published event is routed there: locally
//! when this process owns the stream, over an internal forwarding RPC
//! otherwise.

pub mod bus;
pub mod client;
pub mod filter;
pub mod forwarder;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod server;
pub mod store;
pub mod stream;
pub mod testutil;

pub use forwarder::{EventForwarder, Forwarder};
pub use server::EventStreamServer;
pub use store::{Store, StoreError};

/// Metadata header carrying the internal forwarding RPC api key.
pub const INTERNAL_RPC_API_KEY_HEADER: &str = "x-flipcash-internal-rpc-api-key";
