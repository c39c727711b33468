//! In-memory account store.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::proto::common::{PublicKey, UserId};

use super::{AccountError, Result, Store};

#[derive(Default)]
struct State {
    /// pub key bytes -> user id bytes
    bindings: HashMap<Vec<u8>, Vec<u8>>,
    registered: HashSet<Vec<u8>>,
}

/// In-memory account store for tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn bind(&self, user_id: &UserId, pub_key: &PublicKey) -> Result<UserId> {
        let mut state = self.state.write().expect("account lock poisoned");
        let bound = state
            .bindings
            .entry(pub_key.value.clone())
            .or_insert_with(|| user_id.value.clone());
        Ok(UserId {
            value: bound.clone(),
        })
    }

    async fn get_user_id(&self, pub_key: &PublicKey) -> Result<UserId> {
        let state = self.state.read().expect("account lock poisoned");
        state
            .bindings
            .get(&pub_key.value)
            .map(|value| UserId {
                value: value.clone(),
            })
            .ok_or(AccountError::NotFound)
    }

    async fn is_authorized(&self, user_id: &UserId, pub_key: &PublicKey) -> Result<bool> {
        let state = self.state.read().expect("account lock poisoned");
        Ok(state
            .bindings
            .get(&pub_key.value)
            .is_some_and(|bound| *bound == user_id.value))
    }

    async fn is_registered(&self, user_id: &UserId) -> Result<bool> {
        let state = self.state.read().expect("account lock poisoned");
        Ok(state.registered.contains(&user_id.value))
    }

    async fn set_registration_flag(&self, user_id: &UserId, is_registered: bool) -> Result<()> {
        let mut state = self.state.write().expect("account lock poisoned");
        if is_registered {
            state.registered.insert(user_id.value.clone());
        } else {
            state.registered.remove(&user_id.value);
        }
        Ok(())
    }
}
