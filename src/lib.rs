//! Flipcash real-time event streaming.
//!
//! Stateless front-end servers terminate long-lived event streams from
//! mobile clients. A short-TTL rendezvous lease identifies which server
//! currently hosts a user's stream, and published events are forwarded
//! across servers until they reach that stream.

pub mod account;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod event;
pub mod model;
pub mod proto_ext;

// Re-export generated proto types
pub mod proto {
    pub mod flipcash {
        pub mod common {
            pub mod v1 {
                tonic::include_proto!("flipcash.common.v1");
            }
        }
        pub mod event {
            pub mod v1 {
                tonic::include_proto!("flipcash.event.v1");
            }
        }
    }

    pub use flipcash::common::v1 as common;
    pub use flipcash::event::v1 as event;
}

pub use config::Config;
pub use event::bus::{Bus, HandlerFunc};
pub use event::forwarder::{EventForwarder, Forwarder};
pub use event::server::EventStreamServer;
pub use event::store::{Store, StoreError};
