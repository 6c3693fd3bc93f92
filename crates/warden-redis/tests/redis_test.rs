//! Redis backend tests
//!
//! Run with `TEST_REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use warden_common::{LockId, LockRepository, ResourceId, SchemaManager, TimeToLive};
use warden_core::{CancellationToken, LockProvider, LockProviderExt};
use warden_redis::RedisRepositoryFactory;

fn ttl_ms(ms: u64) -> TimeToLive {
    TimeToLive::from_millis(ms).unwrap()
}

/// Factory with a key prefix unique to the calling test
async fn factory(test: &str) -> RedisRepositoryFactory {
    let url = std::env::var("TEST_REDIS_URL").expect("TEST_REDIS_URL not set");
    let prefix = format!("warden:test:{test}:{}", LockId::generate());
    RedisRepositoryFactory::connect(&url, prefix)
        .await
        .expect("Redis connection failed")
}

#[tokio::test]
#[ignore = "requires redis"]
async fn test_acquire_extend_release() {
    let factory = factory("lifecycle").await;
    factory.schema_manager().create_if_not_exists().await.unwrap();
    let repo = factory.repository();
    let key = ResourceId::new("orders").unwrap();

    let lock_id = repo.try_acquire(&key, ttl_ms(60_000)).await.unwrap().unwrap();
    assert!(repo.try_acquire(&key, ttl_ms(60_000)).await.unwrap().is_none());

    assert!(repo.try_extend(&key, &lock_id, ttl_ms(60_000)).await.unwrap());
    assert!(!repo.try_extend(&key, &LockId::generate(), ttl_ms(60_000)).await.unwrap());
    assert!(!repo.try_release(&key, &LockId::generate()).await.unwrap());

    assert!(repo.try_release(&key, &lock_id).await.unwrap());
    assert!(!repo.try_release(&key, &lock_id).await.unwrap());
}

#[tokio::test]
#[ignore = "requires redis"]
async fn test_expired_lock_is_taken_over() {
    let factory = factory("expiry").await;
    let repo = factory.repository();
    let key = ResourceId::new("reports").unwrap();

    let first = repo.try_acquire(&key, ttl_ms(100)).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    let second = repo.try_acquire(&key, ttl_ms(60_000)).await.unwrap().unwrap();
    assert!(!repo.try_extend(&key, &first, ttl_ms(60_000)).await.unwrap());
    assert!(!repo.try_release(&key, &first).await.unwrap());
    assert!(repo.try_release(&key, &second).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires redis"]
async fn test_concurrent_acquire_single_winner() {
    let factory = factory("contention").await;

    let attempts = (0..32).map(|_| {
        let repo = factory.repository();
        tokio::spawn(async move {
            repo.try_acquire(&ResourceId::new("hot").unwrap(), ttl_ms(60_000))
                .await
        })
    });

    let outcomes: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().expect("losing a race is not an error"))
        .collect();
    assert_eq!(outcomes.len(), 32);
    assert_eq!(outcomes.iter().filter(|o| o.is_some()).count(), 1);
}

#[tokio::test]
#[ignore = "requires redis"]
async fn test_longest_ttl_is_accepted() {
    let factory = factory("long_ttl").await;
    let repo = factory.repository();
    let key = ResourceId::new("archive").unwrap();
    let longest = TimeToLive::new(TimeToLive::MAX).unwrap();

    let lock_id = repo.try_acquire(&key, longest).await.unwrap().unwrap();
    assert!(repo.try_extend(&key, &lock_id, longest).await.unwrap());
    assert!(repo.try_release(&key, &lock_id).await.unwrap());
}

#[tokio::test]
#[ignore = "requires redis"]
async fn test_provider_over_redis() {
    let factory = factory("provider").await;
    let provider = LockProvider::new(Arc::new(factory.clone()))
        .with_schema_manager(Arc::new(factory.schema_manager()));
    let cancel = CancellationToken::new();

    provider.ensure_schema(&cancel).await.unwrap();
    let key = ResourceId::new("billing").unwrap();
    let handle = provider.acquire(&key, ttl_ms(60_000), &cancel).await.unwrap();
    provider.extend(&handle, ttl_ms(60_000), &cancel).await.unwrap();
    provider.release(handle, &cancel).await.unwrap();
}
