//! Relational backend tests against a real SQLite database

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::TestDatabase;
use warden_common::{LockId, LockRepository, ResourceId, SchemaManager, TimeToLive};
use warden_core::{CancellationToken, LockProvider, LockProviderExt, TimeoutRetryPolicy};

fn resource(name: &str) -> ResourceId {
    ResourceId::new(name).unwrap()
}

fn ttl_ms(ms: u64) -> TimeToLive {
    TimeToLive::from_millis(ms).unwrap()
}

#[tokio::test]
async fn test_provisioning_is_idempotent() {
    let db = TestDatabase::sqlite().await.unwrap();
    let factory = db.factory("provision");
    let manager = factory.schema_manager().unwrap();

    assert!(!manager.schema_exists().await.unwrap());
    manager.create_if_not_exists().await.unwrap();
    assert!(manager.schema_exists().await.unwrap());
    manager.create_if_not_exists().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_provisioning() {
    let db = TestDatabase::sqlite().await.unwrap();
    let factory = db.factory("concurrent_provision");
    let manager = Arc::new(factory.schema_manager().unwrap());

    let calls = (0..10).map(|_| {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.create_if_not_exists().await })
    });
    for result in futures::future::join_all(calls).await {
        result.unwrap().unwrap();
    }
    assert!(manager.schema_exists().await.unwrap());
}

#[tokio::test]
async fn test_acquire_extend_release() {
    let db = TestDatabase::sqlite().await.unwrap();
    let factory = db.factory("lifecycle");
    factory.schema_manager().unwrap().create_if_not_exists().await.unwrap();
    let repo = factory.repository();
    let key = resource("orders");

    let lock_id = repo.try_acquire(&key, ttl_ms(60_000)).await.unwrap().unwrap();
    assert!(repo.try_acquire(&key, ttl_ms(60_000)).await.unwrap().is_none());

    assert!(repo.try_extend(&key, &lock_id, ttl_ms(60_000)).await.unwrap());
    assert!(!repo.try_extend(&key, &LockId::generate(), ttl_ms(60_000)).await.unwrap());
    assert!(!repo.try_release(&key, &LockId::generate()).await.unwrap());

    assert!(repo.try_release(&key, &lock_id).await.unwrap());
    assert!(!repo.try_release(&key, &lock_id).await.unwrap());
    assert!(repo.try_acquire(&key, ttl_ms(60_000)).await.unwrap().is_some());
}

#[tokio::test]
async fn test_expired_lock_is_taken_over() {
    let db = TestDatabase::sqlite().await.unwrap();
    let factory = db.factory("expiry");
    factory.schema_manager().unwrap().create_if_not_exists().await.unwrap();
    let repo = factory.repository();
    let key = resource("reports");

    let first = repo.try_acquire(&key, ttl_ms(50)).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let second = repo.try_acquire(&key, ttl_ms(60_000)).await.unwrap().unwrap();
    assert_ne!(first, second);
    assert!(!repo.try_extend(&key, &first, ttl_ms(60_000)).await.unwrap());
    assert!(!repo.try_release(&key, &first).await.unwrap());
    assert!(repo.try_release(&key, &second).await.unwrap());
}

#[tokio::test]
async fn test_purge_expired_records() {
    let db = TestDatabase::sqlite().await.unwrap();
    let factory = db.factory("purge");
    factory.schema_manager().unwrap().create_if_not_exists().await.unwrap();
    let repo = factory.repository();

    repo.try_acquire(&resource("a"), ttl_ms(10)).await.unwrap().unwrap();
    repo.try_acquire(&resource("b"), ttl_ms(60_000)).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(repo.purge_expired().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_single_winner() {
    let db = TestDatabase::sqlite().await.unwrap();
    let factory = db.factory("contention");
    factory.schema_manager().unwrap().create_if_not_exists().await.unwrap();

    let attempts = (0..8).map(|_| {
        let repo = factory.repository();
        tokio::spawn(async move { repo.try_acquire(&resource("hot"), ttl_ms(60_000)).await })
    });

    let outcomes: Vec<Option<LockId>> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().expect("losing a race is not an error"))
        .collect();
    assert_eq!(outcomes.len(), 8);
    assert_eq!(outcomes.iter().filter(|o| o.is_some()).count(), 1);
}

#[tokio::test]
async fn test_extend_replaces_ttl() {
    let db = TestDatabase::sqlite().await.unwrap();
    let factory = db.factory("extend_shorter");
    factory.schema_manager().unwrap().create_if_not_exists().await.unwrap();
    let repo = factory.repository();
    let key = resource("invoices");

    let lock_id = repo.try_acquire(&key, ttl_ms(60_000)).await.unwrap().unwrap();
    assert!(repo.try_extend(&key, &lock_id, ttl_ms(100)).await.unwrap());
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!repo.try_extend(&key, &lock_id, ttl_ms(60_000)).await.unwrap());
    assert!(!repo.try_release(&key, &lock_id).await.unwrap());
    let successor = repo.try_acquire(&key, ttl_ms(60_000)).await.unwrap().unwrap();
    assert_ne!(successor, lock_id);
}

#[tokio::test]
async fn test_provider_over_sqlite() {
    let db = TestDatabase::sqlite().await.unwrap();
    let factory = db.factory("provider");
    let manager = factory.schema_manager().unwrap();
    let provider = LockProvider::new(Arc::new(factory)).with_schema_manager(Arc::new(manager));
    let cancel = CancellationToken::new();

    provider.ensure_schema(&cancel).await.unwrap();

    let key = resource("billing");
    let handle = provider.acquire(&key, ttl_ms(60_000), &cancel).await.unwrap();
    let policy = TimeoutRetryPolicy::fixed(Duration::from_millis(200), Duration::from_millis(20));
    assert!(
        provider
            .acquire_with_retries(&key, ttl_ms(60_000), &policy, &cancel)
            .await
            .is_err()
    );

    provider.release(handle, &cancel).await.unwrap();
    let again = provider
        .acquire_with_retries(&key, ttl_ms(60_000), &policy, &cancel)
        .await
        .unwrap();
    provider.release(again, &cancel).await.unwrap();
}

#[tokio::test]
async fn test_longest_ttl_is_stored() {
    let db = TestDatabase::sqlite().await.unwrap();
    let factory = db.factory("long_ttl");
    factory.schema_manager().unwrap().create_if_not_exists().await.unwrap();
    let repo = factory.repository();
    let key = resource("archive");
    let longest = TimeToLive::new(TimeToLive::MAX).unwrap();

    let lock_id = repo.try_acquire(&key, longest).await.unwrap().unwrap();
    assert!(repo.try_acquire(&key, ttl_ms(60_000)).await.unwrap().is_none());
    assert!(repo.try_extend(&key, &lock_id, longest).await.unwrap());
    assert!(repo.try_release(&key, &lock_id).await.unwrap());
}
