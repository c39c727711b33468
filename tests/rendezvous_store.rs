//! Rendezvous store contract tests against the in-memory store.

#[path = "common/store_suite.rs"]
mod store_suite;

use flipcash_events::event::memory::InMemoryStore;

#[tokio::test]
async fn test_memory_rendezvous_happy_path() {
    let store = InMemoryStore::new();
    store_suite::run_rendezvous_happy_path(&store).await;
}

#[tokio::test]
async fn test_memory_rendezvous_expired_record() {
    let store = InMemoryStore::new();
    store_suite::run_rendezvous_expired_record(&store).await;
}
