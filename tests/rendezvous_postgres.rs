//! Rendezvous store contract tests against PostgreSQL.
//!
//! Spins up PostgreSQL in a container using testcontainers.
//! Run with: FLIPCASH_TEST_MODE=container cargo test --test rendezvous_postgres

#[path = "common/store_suite.rs"]
mod store_suite;

use std::time::Duration;

use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage, ImageExt,
};

use flipcash_events::event::postgres::PostgresStore;

/// Returns true if container tests should run.
fn should_run_container_tests() -> bool {
    std::env::var("FLIPCASH_TEST_MODE")
        .map(|v| v.to_lowercase() == "container")
        .unwrap_or(false)
}

/// Start a PostgreSQL container and return it with a connection string.
async fn start_postgres() -> (testcontainers::ContainerAsync<GenericImage>, String) {
    // PostgreSQL prints the readiness message during initial setup and
    // again when fully ready, so add a small delay after the wait.
    let image = GenericImage::new("postgres", "16")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stdout(
            "database system is ready to accept connections",
        ));

    let container = image
        .with_env_var("POSTGRES_USER", "flipcash")
        .with_env_var("POSTGRES_PASSWORD", "flipcash")
        .with_env_var("POSTGRES_DB", "flipcash")
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start postgres container");

    tokio::time::sleep(Duration::from_secs(1)).await;

    let host_port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get mapped port");
    let host = container
        .get_host()
        .await
        .expect("Failed to get container host");

    let connection_string = format!("postgres://flipcash:flipcash@{}:{}/flipcash", host, host_port);

    (container, connection_string)
}

#[tokio::test]
async fn test_postgres_rendezvous_store() {
    if !should_run_container_tests() {
        println!("Skipping: set FLIPCASH_TEST_MODE=container to run");
        return;
    }

    let (_container, connection_string) = start_postgres().await;

    let pool = sqlx::PgPool::connect(&connection_string)
        .await
        .expect("Failed to connect to PostgreSQL");

    let store = PostgresStore::new(pool.clone());
    store.init().await.expect("Failed to create schema");

    store_suite::run_rendezvous_happy_path(&store).await;

    sqlx::query("DELETE FROM flipcash_rendezvous")
        .execute(&pool)
        .await
        .expect("Failed to reset table");

    store_suite::run_rendezvous_expired_record(&store).await;
}
