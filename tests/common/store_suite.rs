//! Shared contract suite for rendezvous store implementations.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};

use flipcash_events::event::model::Rendezvous;
use flipcash_events::event::{Store, StoreError};

fn assert_equivalent_rendezvous(expected: &Rendezvous, actual: &Rendezvous) {
    assert_eq!(expected.key, actual.key);
    assert_eq!(expected.address, actual.address);
    // Stores may truncate timestamp precision
    assert_eq!(expected.expires_at.timestamp(), actual.expires_at.timestamp());
}

pub async fn run_rendezvous_happy_path(store: &dyn Store) {
    let mut record = Rendezvous {
        key: "key".to_string(),
        address: "localhost:1234".to_string(),
        expires_at: Utc::now() + ChronoDuration::seconds(1),
    };
    let mut cloned = record.clone();

    // Operations on an absent key
    store
        .delete_rendezvous(&record.key, &record.address)
        .await
        .unwrap();
    assert!(matches!(
        store.get_rendezvous(&record.key).await.unwrap_err(),
        StoreError::RendezvousNotFound
    ));
    assert!(matches!(
        store
            .extend_rendezvous_expiry(
                &record.key,
                &record.address,
                Utc::now() + ChronoDuration::minutes(1),
            )
            .await
            .unwrap_err(),
        StoreError::RendezvousNotFound
    ));

    store.create_rendezvous(&record).await.unwrap();

    let actual = store.get_rendezvous(&record.key).await.unwrap();
    assert_equivalent_rendezvous(&cloned, &actual);

    // A live record blocks creation from another address
    tokio::time::sleep(Duration::from_millis(1)).await;
    record.address = "localhost:5678".to_string();
    record.expires_at = Utc::now() + ChronoDuration::seconds(2);
    cloned = record.clone();
    assert!(matches!(
        store.create_rendezvous(&record).await.unwrap_err(),
        StoreError::RendezvousExists
    ));

    // Once the original expires, the same create succeeds
    tokio::time::sleep(Duration::from_secs(1)).await;
    store.create_rendezvous(&record).await.unwrap();

    let actual = store.get_rendezvous(&record.key).await.unwrap();
    assert_equivalent_rendezvous(&cloned, &actual);

    // Extension by the holder, repeated extension with the same expiry
    // being a no-op
    record.expires_at += ChronoDuration::minutes(10);
    cloned = record.clone();
    store
        .extend_rendezvous_expiry(&record.key, &record.address, record.expires_at)
        .await
        .unwrap();
    store
        .extend_rendezvous_expiry(&record.key, &record.address, record.expires_at)
        .await
        .unwrap();

    let actual = store.get_rendezvous(&record.key).await.unwrap();
    assert_equivalent_rendezvous(&cloned, &actual);

    // Deletion scoped to another address leaves the record alone
    store
        .delete_rendezvous(&record.key, "localhost:8888")
        .await
        .unwrap();

    let actual = store.get_rendezvous(&record.key).await.unwrap();
    assert_equivalent_rendezvous(&cloned, &actual);

    store
        .delete_rendezvous(&record.key, &record.address)
        .await
        .unwrap();

    assert!(matches!(
        store.get_rendezvous(&record.key).await.unwrap_err(),
        StoreError::RendezvousNotFound
    ));
}

pub async fn run_rendezvous_expired_record(store: &dyn Store) {
    let record = Rendezvous {
        key: "key".to_string(),
        address: "localhost:1234".to_string(),
        expires_at: Utc::now() + ChronoDuration::milliseconds(100),
    };
    store.create_rendezvous(&record).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    // An expired record is invisible to reads and extension, and deletion
    // still succeeds
    assert!(matches!(
        store.get_rendezvous(&record.key).await.unwrap_err(),
        StoreError::RendezvousNotFound
    ));
    assert!(matches!(
        store
            .extend_rendezvous_expiry(
                &record.key,
                &record.address,
                Utc::now() + ChronoDuration::minutes(1),
            )
            .await
            .unwrap_err(),
        StoreError::RendezvousNotFound
    ));
    store
        .delete_rendezvous(&record.key, &record.address)
        .await
        .unwrap();
}
