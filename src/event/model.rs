//! Domain records for the event subsystem.

use chrono::{DateTime, Utc};

/// A published event paired with the key it was published under.
#[derive(Debug, Clone)]
pub struct KeyAndEvent<K, E> {
    pub key: K,
    pub event: E,
}

/// Rendezvous record naming the server that owns a user's stream.
///
/// `expires_at` is the only liveness predicate: readers treat an expired
/// record as absent, and an expired record may be overwritten by a
/// subsequent create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendezvous {
    /// Stream key derived from the user identifier.
    pub key: String,
    /// host:port of the owning server.
    pub address: String,
    /// Absolute expiry of the lease.
    pub expires_at: DateTime<Utc>,
}
