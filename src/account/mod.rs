//! Account collaborator interface.
//!
//! The streaming subsystem needs only a narrow slice of the account
//! service: public-key bindings for authorization and the registration
//! flag gating stream access.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::proto::common::{PublicKey, UserId};

pub use memory::InMemoryStore;

/// Result type for account operations.
pub type Result<T> = std::result::Result<T, AccountError>;

/// Errors from account lookups.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("not found")]
    NotFound,

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Account lookups consumed by the streaming subsystem.
#[async_trait]
pub trait Store: Send + Sync {
    /// Bind a public key to a user, or return the previously bound user.
    async fn bind(&self, user_id: &UserId, pub_key: &PublicKey) -> Result<UserId>;

    /// Return the user a public key is bound to.
    ///
    /// `AccountError::NotFound` if no binding exists.
    async fn get_user_id(&self, pub_key: &PublicKey) -> Result<UserId>;

    /// Whether a public key may act on behalf of the user.
    async fn is_authorized(&self, user_id: &UserId, pub_key: &PublicKey) -> Result<bool>;

    /// Whether the user completed registration.
    async fn is_registered(&self, user_id: &UserId) -> Result<bool>;

    /// Set the registration flag for a user.
    async fn set_registration_flag(&self, user_id: &UserId, is_registered: bool) -> Result<()>;
}
