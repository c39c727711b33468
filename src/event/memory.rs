//! In-memory rendezvous store.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::model::Rendezvous;
use super::store::{Result, Store, StoreError};

/// In-memory rendezvous store for tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryStore {
    rendezvous: RwLock<Vec<Rendezvous>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_rendezvous(&self, rendezvous: &Rendezvous) -> Result<()> {
        let mut records = self.rendezvous.write().expect("store lock poisoned");

        if let Some(existing) = records.iter_mut().find(|r| r.key == rendezvous.key) {
            if existing.expires_at > Utc::now() {
                return Err(StoreError::RendezvousExists);
            }

            existing.address = rendezvous.address.clone();
            existing.expires_at = rendezvous.expires_at;
        } else {
            records.push(rendezvous.clone());
        }

        Ok(())
    }

    async fn get_rendezvous(&self, key: &str) -> Result<Rendezvous> {
        let records = self.rendezvous.read().expect("store lock poisoned");

        let record = records
            .iter()
            .find(|r| r.key == key)
            .ok_or(StoreError::RendezvousNotFound)?;

        if record.expires_at < Utc::now() {
            return Err(StoreError::RendezvousNotFound);
        }

        Ok(record.clone())
    }

    async fn extend_rendezvous_expiry(
        &self,
        key: &str,
        address: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut records = self.rendezvous.write().expect("store lock poisoned");

        let record = records
            .iter_mut()
            .find(|r| r.key == key && r.address == address)
            .ok_or(StoreError::RendezvousNotFound)?;

        if record.expires_at < Utc::now() {
            return Err(StoreError::RendezvousNotFound);
        }

        record.expires_at = expires_at;

        Ok(())
    }

    async fn delete_rendezvous(&self, key: &str, address: &str) -> Result<()> {
        let mut records = self.rendezvous.write().expect("store lock poisoned");
        records.retain(|r| !(r.key == key && r.address == address));
        Ok(())
    }
}
