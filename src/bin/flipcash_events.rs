//! Event streaming server binary.

use std::sync::Arc;

use tonic::transport::Server;
use tracing::info;

use flipcash_events::account;
use flipcash_events::auth::{AccountAuthorizer, KeyPairAuthenticator};
use flipcash_events::bootstrap;
use flipcash_events::config::{Config, StorageType};
use flipcash_events::event::{memory, postgres, EventStreamServer};
use flipcash_events::proto::event::event_streaming_server::EventStreamingServer;
use flipcash_events::{event, Bus};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    bootstrap::init_tracing();

    let config = Config::load()?;

    let events: Arc<dyn event::Store> = match config.storage.storage_type {
        StorageType::Memory => {
            info!("Storage: memory");
            Arc::new(memory::InMemoryStore::new())
        }
        StorageType::Postgres => {
            info!("Storage: postgres at {}", config.storage.postgres.uri);
            let pool = sqlx::PgPool::connect(&config.storage.postgres.uri).await?;
            let store = postgres::PostgresStore::new(pool);
            store.init().await?;
            Arc::new(store)
        }
    };

    let accounts: Arc<dyn account::Store> = Arc::new(account::InMemoryStore::new());
    let authz = Arc::new(AccountAuthorizer::new(
        accounts.clone(),
        Arc::new(KeyPairAuthenticator::new()),
    ));

    let event_bus = Bus::new();
    let server = EventStreamServer::new(
        authz,
        accounts,
        events,
        &event_bus,
        Vec::new(),
        config.stream.clone(),
    );

    let addr = config.server.addr().parse()?;
    info!(address = %addr, broadcast_address = %config.stream.broadcast_address, "Server listening");

    Server::builder()
        .add_service(EventStreamingServer::new(server))
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
