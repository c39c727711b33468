//! Rendezvous lease store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::model::Rendezvous;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from rendezvous store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rendezvous already exists")]
    RendezvousExists,

    #[error("rendezvous not found")]
    RendezvousNotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable lease table mapping stream keys to owning server addresses.
///
/// The table gives each stream owner a short-lived, self-refreshing lease
/// any other server can resolve in one lookup. Expiry is the only
/// liveness predicate; a crashed owner is evicted within one ttl.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a rendezvous for an event stream.
    ///
    /// Fails with `RendezvousExists` if an unexpired record already holds
    /// the key. Must be atomic against concurrent creates for one key.
    async fn create_rendezvous(&self, rendezvous: &Rendezvous) -> Result<()>;

    /// Get the unexpired rendezvous for a key.
    ///
    /// Expired records are reported as `RendezvousNotFound`.
    async fn get_rendezvous(&self, key: &str) -> Result<Rendezvous>;

    /// Extend a lease's expiry.
    ///
    /// Only the current holder (matching address) of an unexpired lease
    /// may extend; anything else is `RendezvousNotFound`.
    async fn extend_rendezvous_expiry(
        &self,
        key: &str,
        address: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Delete the rendezvous held by `address` for `key`.
    ///
    /// Best effort: absence is not an error.
    async fn delete_rendezvous(&self, key: &str, address: &str) -> Result<()>;
}
