// In-memory lock repository
// Single-process backend with the same contract as the storage backends

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use warden_common::{LockId, LockRepository, RepositoryFactory, ResourceId, Result, TimeToLive};

/// A live or expired lock record
#[derive(Debug, Clone)]
pub(crate) struct LockEntry {
    lock_id: LockId,
    expires_at: Instant,
}

impl LockEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

fn expiry_after(now: Instant, ttl: TimeToLive) -> Instant {
    now + ttl.as_duration()
}

/// In-memory lock repository using DashMap
///
/// Each shard lock of the map plays the role of the relational backend's
/// predicate lock: the check and the write of a single resource id happen
/// under the same entry guard. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryLockRepository {
    locks: Arc<DashMap<ResourceId, LockEntry>>,
}

impl MemoryLockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently stored, live or expired
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Whether a live record exists for `resource_id`
    pub fn is_locked(&self, resource_id: &ResourceId) -> bool {
        let now = Instant::now();
        self.locks
            .get(resource_id)
            .is_some_and(|entry| entry.is_live(now))
    }

    /// Physically delete expired records, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.locks.len();
        self.locks.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.locks.len())
    }

    /// Start a background task that purges expired records every `interval`
    /// until `cancel` fires
    pub fn spawn_expiry_task(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let repository = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = repository.purge_expired();
                        if removed > 0 {
                            debug!(count = removed, "Cleaned up expired lock entries");
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl LockRepository for MemoryLockRepository {
    async fn try_acquire(
        &self,
        resource_id: &ResourceId,
        ttl: TimeToLive,
    ) -> Result<Option<LockId>> {
        let lock_id = LockId::generate();
        let now = Instant::now();
        let fresh = LockEntry {
            lock_id,
            expires_at: expiry_after(now, ttl),
        };

        match self.locks.entry(resource_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return Ok(None);
                }
                occupied.insert(fresh);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
            }
        }

        Ok(Some(lock_id))
    }

    async fn try_extend(
        &self,
        resource_id: &ResourceId,
        lock_id: &LockId,
        ttl: TimeToLive,
    ) -> Result<bool> {
        let now = Instant::now();
        let Some(mut entry) = self.locks.get_mut(resource_id) else {
            return Ok(false);
        };

        if entry.lock_id != *lock_id || !entry.is_live(now) {
            return Ok(false);
        }

        entry.expires_at = expiry_after(now, ttl);
        Ok(true)
    }

    async fn try_release(&self, resource_id: &ResourceId, lock_id: &LockId) -> Result<bool> {
        let now = Instant::now();
        let removed = self
            .locks
            .remove_if(resource_id, |_, entry| {
                entry.lock_id == *lock_id && entry.is_live(now)
            })
            .is_some();
        Ok(removed)
    }
}

impl RepositoryFactory for MemoryLockRepository {
    fn create(&self) -> Result<Box<dyn LockRepository>> {
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(name: &str) -> ResourceId {
        ResourceId::new(name).unwrap()
    }

    fn ttl_ms(ms: u64) -> TimeToLive {
        TimeToLive::from_millis(ms).unwrap()
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let repo = MemoryLockRepository::new();
        let key = resource("key1");

        let lock_id = repo.try_acquire(&key, ttl_ms(60_000)).await.unwrap().unwrap();
        assert!(repo.is_locked(&key));
        assert!(repo.try_release(&key, &lock_id).await.unwrap());
        assert!(!repo.is_locked(&key));
    }

    #[tokio::test]
    async fn test_acquire_conflict() {
        let repo = MemoryLockRepository::new();
        let key = resource("key1");

        assert!(repo.try_acquire(&key, ttl_ms(60_000)).await.unwrap().is_some());
        assert!(repo.try_acquire(&key, ttl_ms(60_000)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_wrong_lock_id() {
        let repo = MemoryLockRepository::new();
        let key = resource("key1");

        let lock_id = repo.try_acquire(&key, ttl_ms(60_000)).await.unwrap().unwrap();
        assert!(!repo.try_release(&key, &LockId::generate()).await.unwrap());
        assert!(!repo.try_extend(&key, &LockId::generate(), ttl_ms(10)).await.unwrap());
        assert!(repo.try_release(&key, &lock_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_nonexistent() {
        let repo = MemoryLockRepository::new();
        assert!(
            !repo
                .try_release(&resource("nonexistent"), &LockId::generate())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_double_release_returns_false() {
        let repo = MemoryLockRepository::new();
        let key = resource("key1");

        let lock_id = repo.try_acquire(&key, ttl_ms(60_000)).await.unwrap().unwrap();
        assert!(repo.try_release(&key, &lock_id).await.unwrap());
        assert!(!repo.try_release(&key, &lock_id).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_after_expiry() {
        let repo = MemoryLockRepository::new();
        let key = resource("key1");

        let first = repo.try_acquire(&key, ttl_ms(1_000)).await.unwrap().unwrap();
        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(repo.try_acquire(&key, ttl_ms(1_000)).await.unwrap().is_none());

        tokio::time::advance(Duration::from_millis(1)).await;
        let second = repo.try_acquire(&key, ttl_ms(1_000)).await.unwrap().unwrap();
        assert_ne!(first, second);

        // The expired holder can no longer touch its successor's record
        assert!(!repo.try_extend(&key, &first, ttl_ms(1_000)).await.unwrap());
        assert!(!repo.try_release(&key, &first).await.unwrap());
        assert!(repo.is_locked(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_replaces_remaining_ttl() {
        let repo = MemoryLockRepository::new();
        let key = resource("key1");

        let lock_id = repo.try_acquire(&key, ttl_ms(5_000)).await.unwrap().unwrap();
        assert!(repo.try_extend(&key, &lock_id, ttl_ms(2_000)).await.unwrap());

        tokio::time::advance(Duration::from_millis(2_500)).await;
        assert!(!repo.is_locked(&key));
        assert!(!repo.try_extend(&key, &lock_id, ttl_ms(2_000)).await.unwrap());
        assert!(!repo.try_release(&key, &lock_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_longest_ttl_is_held() {
        let repo = MemoryLockRepository::new();
        let key = resource("key1");
        let longest = TimeToLive::new(TimeToLive::MAX).unwrap();

        let lock_id = repo.try_acquire(&key, longest).await.unwrap().unwrap();
        assert!(repo.try_extend(&key, &lock_id, longest).await.unwrap());
        assert!(repo.is_locked(&key));
        assert!(repo.try_release(&key, &lock_id).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let repo = MemoryLockRepository::new();
        repo.try_acquire(&resource("a"), ttl_ms(10)).await.unwrap();
        repo.try_acquire(&resource("b"), ttl_ms(10_000)).await.unwrap();

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(repo.purge_expired(), 1);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_task_stops_on_cancel() {
        let repo = MemoryLockRepository::new();
        repo.try_acquire(&resource("a"), ttl_ms(10)).await.unwrap();

        let cancel = CancellationToken::new();
        let task = repo.spawn_expiry_task(Duration::from_millis(50), cancel.clone());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(repo.is_empty());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_single_winner() {
        let repo = MemoryLockRepository::new();
        let key = resource("contended");

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let repo = repo.clone();
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                repo.try_acquire(&key, ttl_ms(60_000)).await.unwrap()
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
