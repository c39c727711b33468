//! PostgreSQL rendezvous store.
//!
//! Create relies on a conditional upsert so that claiming a key is atomic:
//! the insert only replaces a row whose lease has already expired, and a
//! conflicting live row surfaces as `RendezvousExists`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use super::model::Rendezvous;
use super::store::{Result, Store, StoreError};

const TABLE: &str = "flipcash_rendezvous";

/// PostgreSQL implementation of the rendezvous store.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL rendezvous store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the rendezvous table if it does not exist.
    pub async fn init(&self) -> Result<()> {
        let query = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {TABLE} (
                key        TEXT PRIMARY KEY,
                address    TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#
        );
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn create_rendezvous(&self, rendezvous: &Rendezvous) -> Result<()> {
        let query = format!(
            r#"
            INSERT INTO {TABLE} (key, address, created_at, updated_at, expires_at)
            VALUES ($1, $2, NOW(), NOW(), $3)

            ON CONFLICT (key)
            DO UPDATE
                SET address = $2, updated_at = NOW(), expires_at = $3
                WHERE {TABLE}.expires_at < NOW()

            RETURNING key
            "#
        );

        let row = sqlx::query(&query)
            .bind(&rendezvous.key)
            .bind(&rendezvous.address)
            .bind(rendezvous.expires_at)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(_) => Ok(()),
            None => Err(StoreError::RendezvousExists),
        }
    }

    async fn get_rendezvous(&self, key: &str) -> Result<Rendezvous> {
        let query = format!(
            r#"
            SELECT key, address, expires_at FROM {TABLE}
            WHERE key = $1 AND expires_at > NOW()
            "#
        );

        let row = sqlx::query(&query)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::RendezvousNotFound)?;

        Ok(Rendezvous {
            key: row.get("key"),
            address: row.get("address"),
            expires_at: row.get("expires_at"),
        })
    }

    async fn extend_rendezvous_expiry(
        &self,
        key: &str,
        address: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let query = format!(
            r#"
            UPDATE {TABLE}
            SET expires_at = $1, updated_at = NOW()
            WHERE key = $2 AND address = $3 AND expires_at > NOW()
            "#
        );

        let result = sqlx::query(&query)
            .bind(expires_at)
            .bind(key)
            .bind(address)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RendezvousNotFound);
        }

        Ok(())
    }

    async fn delete_rendezvous(&self, key: &str, address: &str) -> Result<()> {
        let query = format!(
            r#"
            DELETE FROM {TABLE}
            WHERE key = $1 AND address = $2
            "#
        );

        sqlx::query(&query)
            .bind(key)
            .bind(address)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
