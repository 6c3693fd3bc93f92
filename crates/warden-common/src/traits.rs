//! Storage contracts every lock backend must satisfy
//!
//! A backend enforces mutual exclusion through its own atomicity primitive
//! (transactional predicate locks or conditional writes). Records are always
//! addressed by the `(resource id, lock id)` pair for extend and release, so a
//! holder whose lease already expired can never touch its successor's lock.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{LockId, ResourceId, TimeToLive};

/// Try-once lock storage operations
///
/// Contention is not an error: losing a race is reported as `None`/`false`.
/// `Err` is reserved for transient backend failures, validation failures and
/// protocol violations.
#[async_trait]
pub trait LockRepository: Send + Sync {
    /// Purge expired records for `resource_id`, then insert a fresh record
    /// expiring after `ttl` only if no live record exists.
    ///
    /// Returns the newly minted lock id on success.
    async fn try_acquire(&self, resource_id: &ResourceId, ttl: TimeToLive)
    -> Result<Option<LockId>>;

    /// Replace the expiry of the live record matching both ids with `now + ttl`
    async fn try_extend(
        &self,
        resource_id: &ResourceId,
        lock_id: &LockId,
        ttl: TimeToLive,
    ) -> Result<bool>;

    /// Delete the live record matching both ids
    async fn try_release(&self, resource_id: &ResourceId, lock_id: &LockId) -> Result<bool>;
}

/// Produces a fresh repository handle per logical operation
///
/// Callers never cache the returned repository, so connection lifetimes stay
/// scoped to a single operation.
pub trait RepositoryFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn LockRepository>>;
}

impl<F> RepositoryFactory for F
where
    F: Fn() -> Result<Box<dyn LockRepository>> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn LockRepository>> {
        self()
    }
}

/// Verifies and provisions the physical structures a backend needs
#[async_trait]
pub trait SchemaManager: Send + Sync {
    /// Whether the lock table (or equivalent) already exists
    async fn schema_exists(&self) -> Result<bool>;

    /// Create the lock table and its indexes if missing.
    ///
    /// Safe to call concurrently from many processes: exactly one creates the
    /// structures and every caller returns `Ok(())`.
    async fn create_if_not_exists(&self) -> Result<()>;
}
