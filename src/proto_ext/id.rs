//! Identifier conversion traits.

use uuid::Uuid;

use crate::proto::common::UserId;
use crate::proto::event::EventId;

/// Generate a fresh random event identifier.
pub fn generate_event_id() -> EventId {
    EventId {
        value: Uuid::new_v4().as_bytes().to_vec(),
    }
}

/// Extension trait for the EventId proto type.
pub trait EventIdExt {
    /// Hex-encoded form for logging.
    fn to_hex(&self) -> String;
}

impl EventIdExt for EventId {
    fn to_hex(&self) -> String {
        hex::encode(&self.value)
    }
}

/// Extension trait for the UserId proto type.
pub trait UserIdExt {
    /// Stable printable key identifying the user's stream.
    ///
    /// Used as the rendezvous primary key and the in-memory registry key.
    fn stream_key(&self) -> String;
}

impl UserIdExt for UserId {
    fn stream_key(&self) -> String {
        hex::encode(&self.value)
    }
}
