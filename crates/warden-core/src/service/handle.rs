// Lock handle: a held lock bound to its (resource id, lock id) identity
// Released exactly once, explicitly or when the handle is dropped

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use warden_common::{LockId, RepositoryFactory, ResourceId, Result, TimeToLive};

use super::run_cancellable;

/// A held distributed lock
///
/// Only created by a successful acquire. Extending never changes the handle's
/// identity, only the expiry of the backing record. The handle does not own
/// the repository: it keeps the shared factory and asks it for a fresh
/// repository per operation.
///
/// Dropping an unreleased handle releases it on the current Tokio runtime as
/// a best-effort background task; failures are logged and never propagated.
/// Use [`LockProviderExt::release`](crate::LockProviderExt::release) when a
/// failed release must reach the caller.
pub struct LockHandle {
    resource_id: ResourceId,
    lock_id: LockId,
    factory: Arc<dyn RepositoryFactory>,
    released: bool,
}

impl LockHandle {
    pub(crate) fn new(
        resource_id: ResourceId,
        lock_id: LockId,
        factory: Arc<dyn RepositoryFactory>,
    ) -> Self {
        Self {
            resource_id,
            lock_id,
            factory,
            released: false,
        }
    }

    pub fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    pub fn lock_id(&self) -> &LockId {
        &self.lock_id
    }

    /// Whether a release has already been attempted to completion
    pub fn is_released(&self) -> bool {
        self.released
    }

    pub(crate) fn mark_released(&mut self) {
        self.released = true;
    }

    /// Replace the remaining lease with `ttl`.
    ///
    /// Returns `false` when the lease already expired, was taken over, or the
    /// handle was released.
    pub async fn try_extend(&self, ttl: TimeToLive, cancel: &CancellationToken) -> Result<bool> {
        if self.released {
            return Ok(false);
        }

        let repository = self.factory.create()?;
        let extended = run_cancellable(
            cancel,
            repository.try_extend(&self.resource_id, &self.lock_id, ttl),
        )
        .await?;

        debug!(
            resource_id = %self.resource_id,
            lock_id = %self.lock_id,
            ttl_ms = ttl.as_millis_u64(),
            extended,
            "Lock extend attempted"
        );
        Ok(extended)
    }

    /// Release the lock.
    ///
    /// A second call returns `false` without touching storage. Once storage
    /// has answered (released or already gone), dropping the handle no longer
    /// triggers a background release. On error the handle stays unreleased.
    pub async fn try_release(&mut self, cancel: &CancellationToken) -> Result<bool> {
        if self.released {
            return Ok(false);
        }

        let repository = self.factory.create()?;
        let released = run_cancellable(
            cancel,
            repository.try_release(&self.resource_id, &self.lock_id),
        )
        .await?;
        self.released = true;

        debug!(
            resource_id = %self.resource_id,
            lock_id = %self.lock_id,
            released,
            "Lock release attempted"
        );
        Ok(released)
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("resource_id", &self.resource_id)
            .field("lock_id", &self.lock_id)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let resource_id = self.resource_id.clone();
        let lock_id = self.lock_id;
        let factory = Arc::clone(&self.factory);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                resource_id = %resource_id,
                lock_id = %lock_id,
                "No async runtime to release dropped lock; it will expire after its ttl"
            );
            return;
        };

        runtime.spawn(async move {
            let outcome = match factory.create() {
                Ok(repository) => repository.try_release(&resource_id, &lock_id).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(true) => debug!(
                    resource_id = %resource_id,
                    lock_id = %lock_id,
                    "Dropped lock released"
                ),
                Ok(false) => debug!(
                    resource_id = %resource_id,
                    lock_id = %lock_id,
                    "Dropped lock had already expired"
                ),
                Err(e) => warn!(
                    resource_id = %resource_id,
                    lock_id = %lock_id,
                    error = %e,
                    "Failed to release dropped lock; it will expire after its ttl"
                ),
            }
        });
    }
}
