//! Request authentication and authorization.
//!
//! An [`Authenticator`] checks that a signed payload is authentic; an
//! [`Authorizer`] additionally resolves which user the signer may act as.
//! Authorization is the more expensive step since it performs lookups, so
//! inauthentic requests short-circuit before touching the account store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tonic::Status;

use crate::account;
use crate::proto::common::{auth, Auth, PublicKey, UserId};

/// Authenticates a payload against the signature carried in `Auth`.
///
/// The payload is the canonical serialization of the request message with
/// its auth field cleared, which is exactly what clients sign.
pub trait Authenticator: Send + Sync {
    /// Verify the signature and return the signing public key.
    fn verify(&self, payload: &[u8], auth: &Auth) -> Result<PublicKey, Status>;
}

/// Authorizes an action and returns the acting user.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Authenticate the signed payload and resolve the user it acts as.
    async fn authorize(&self, payload: &[u8], auth: &Auth) -> Result<UserId, Status>;
}

/// Ed25519 key-pair authenticator.
#[derive(Default)]
pub struct KeyPairAuthenticator;

impl KeyPairAuthenticator {
    pub fn new() -> Self {
        Self
    }
}

impl Authenticator for KeyPairAuthenticator {
    fn verify(&self, payload: &[u8], auth: &Auth) -> Result<PublicKey, Status> {
        let Some(auth::Kind::KeyPair(key_pair)) = &auth.kind else {
            return Err(Status::invalid_argument("missing keypair"));
        };

        let pub_key = key_pair
            .pub_key
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("missing pubkey"))?;
        let key_bytes: [u8; 32] = pub_key
            .value
            .as_slice()
            .try_into()
            .map_err(|_| Status::invalid_argument("invalid pubkey"))?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| Status::invalid_argument("invalid pubkey"))?;

        let signature = key_pair
            .signature
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("missing signature"))?;
        let signature = Signature::from_slice(&signature.value)
            .map_err(|_| Status::invalid_argument("invalid auth"))?;

        verifying_key
            .verify(payload, &signature)
            .map_err(|_| Status::unauthenticated("signature verification failed"))?;

        Ok(pub_key.clone())
    }
}

/// Authorizer backed by the account store's public-key bindings.
pub struct AccountAuthorizer {
    authenticator: Arc<dyn Authenticator>,
    accounts: Arc<dyn account::Store>,
}

impl AccountAuthorizer {
    pub fn new(accounts: Arc<dyn account::Store>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            accounts,
        }
    }
}

#[async_trait]
impl Authorizer for AccountAuthorizer {
    async fn authorize(&self, payload: &[u8], auth: &Auth) -> Result<UserId, Status> {
        let pub_key = self.authenticator.verify(payload, auth)?;

        let user_id = match self.accounts.get_user_id(&pub_key).await {
            Ok(user_id) => user_id,
            Err(account::AccountError::NotFound) => {
                return Err(Status::permission_denied("permission denied"));
            }
            Err(err) => {
                return Err(Status::internal(format!("account lookup failed: {err}")));
            }
        };

        let authorized = self
            .accounts
            .is_authorized(&user_id, &pub_key)
            .await
            .map_err(|err| Status::internal(format!("account lookup failed: {err}")))?;
        if !authorized {
            return Err(Status::permission_denied("permission denied"));
        }

        Ok(user_id)
    }
}

/// Fixed-table authorizer for tests.
pub struct StaticAuthorizer {
    authenticator: KeyPairAuthenticator,
    key_pairs: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl StaticAuthorizer {
    pub fn new() -> Self {
        Self {
            authenticator: KeyPairAuthenticator::new(),
            key_pairs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a public key as acting for a user.
    pub fn add(&self, user_id: &UserId, pub_key: &PublicKey) {
        self.key_pairs
            .write()
            .expect("authorizer lock poisoned")
            .insert(pub_key.value.clone(), user_id.value.clone());
    }
}

impl Default for StaticAuthorizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authorize(&self, payload: &[u8], auth: &Auth) -> Result<UserId, Status> {
        let pub_key = self.authenticator.verify(payload, auth)?;

        let key_pairs = self.key_pairs.read().expect("authorizer lock poisoned");
        let user_id = key_pairs
            .get(&pub_key.value)
            .ok_or_else(|| Status::permission_denied("permission denied"))?;

        Ok(UserId {
            value: user_id.clone(),
        })
    }
}
