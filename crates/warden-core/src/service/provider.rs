// Lock provider: boolean-returning facade over a storage repository
// Mints lock handles on successful acquisition

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use warden_common::{
    LockId, RepositoryFactory, ResourceId, Result, SchemaManager, TimeToLive, WardenError,
};

use super::handle::LockHandle;
use super::retry::{RetryPolicy, execute_with_retries};
use super::run_cancellable;

/// Distributed lock facade
///
/// Contention is reported as `None`/`false`, never as an error. The provider
/// holds no per-operation state and is cheap to clone; every call asks the
/// factory for a fresh repository.
#[derive(Clone)]
pub struct LockProvider {
    factory: Arc<dyn RepositoryFactory>,
    schema_manager: Option<Arc<dyn SchemaManager>>,
}

impl LockProvider {
    pub fn new(factory: Arc<dyn RepositoryFactory>) -> Self {
        Self {
            factory,
            schema_manager: None,
        }
    }

    /// Attach the backend's schema manager used by [`LockProvider::ensure_schema`]
    pub fn with_schema_manager(mut self, schema_manager: Arc<dyn SchemaManager>) -> Self {
        self.schema_manager = Some(schema_manager);
        self
    }

    /// Provision the backend structures if they are missing.
    ///
    /// Backends without a schema manager have nothing to provision.
    pub async fn ensure_schema(&self, cancel: &CancellationToken) -> Result<()> {
        let Some(manager) = &self.schema_manager else {
            return Ok(());
        };

        run_cancellable(cancel, provision(manager.as_ref())).await
    }

    /// Try once to acquire `resource_id` for `ttl`
    pub async fn try_acquire(
        &self,
        resource_id: &ResourceId,
        ttl: TimeToLive,
        cancel: &CancellationToken,
    ) -> Result<Option<LockHandle>> {
        let repository = self.factory.create()?;
        let acquired = run_cancellable(cancel, repository.try_acquire(resource_id, ttl)).await?;

        match acquired {
            Some(lock_id) => {
                debug!(
                    resource_id = %resource_id,
                    lock_id = %lock_id,
                    ttl_ms = ttl.as_millis_u64(),
                    "Lock acquired"
                );
                Ok(Some(LockHandle::new(
                    resource_id.clone(),
                    lock_id,
                    Arc::clone(&self.factory),
                )))
            }
            None => {
                debug!(resource_id = %resource_id, "Lock held by another owner");
                Ok(None)
            }
        }
    }

    /// Try once to replace the lease of `handle` with `ttl`
    pub async fn try_extend(
        &self,
        handle: &LockHandle,
        ttl: TimeToLive,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        handle.try_extend(ttl, cancel).await
    }

    /// Try once to release `handle`
    pub async fn try_release(
        &self,
        handle: &mut LockHandle,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        handle.try_release(cancel).await
    }

    /// Retry acquisition until it succeeds or `policy` gives up.
    ///
    /// Exhausting the policy while only losing races yields `Ok(None)`; if the
    /// last attempt failed with a transient error, the `RetryExecutionFailed`
    /// error carrying it is returned instead.
    pub async fn try_acquire_with_retries(
        &self,
        resource_id: &ResourceId,
        ttl: TimeToLive,
        policy: &dyn RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Option<LockHandle>> {
        let outcome = execute_with_retries(
            || self.try_acquire(resource_id, ttl, cancel),
            policy,
            cancel,
        )
        .await;
        contention_to_none(outcome)
    }

    /// Retry extension until it succeeds or `policy` gives up
    pub async fn try_extend_with_retries(
        &self,
        handle: &LockHandle,
        ttl: TimeToLive,
        policy: &dyn RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let outcome = execute_with_retries(
            || async move {
                let extended = handle.try_extend(ttl, cancel).await?;
                Ok::<_, WardenError>(extended.then_some(()))
            },
            policy,
            cancel,
        )
        .await;
        Ok(contention_to_none(outcome)?.is_some())
    }

    /// Retry release until it succeeds or `policy` gives up
    pub async fn try_release_with_retries(
        &self,
        handle: &mut LockHandle,
        policy: &dyn RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if handle.is_released() {
            return Ok(false);
        }

        let resource_id = handle.resource_id().clone();
        let lock_id = *handle.lock_id();
        let outcome = execute_with_retries(
            || {
                let resource_id = &resource_id;
                async move {
                    let released = self.release_record(resource_id, &lock_id, cancel).await?;
                    Ok::<_, WardenError>(released.then_some(()))
                }
            },
            policy,
            cancel,
        )
        .await;

        let released = contention_to_none(outcome)?.is_some();
        handle.mark_released();
        Ok(released)
    }

    async fn release_record(
        &self,
        resource_id: &ResourceId,
        lock_id: &LockId,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let repository = self.factory.create()?;
        run_cancellable(cancel, repository.try_release(resource_id, lock_id)).await
    }
}

impl std::fmt::Debug for LockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockProvider")
            .field("schema_manager", &self.schema_manager.is_some())
            .finish_non_exhaustive()
    }
}

async fn provision(manager: &dyn SchemaManager) -> Result<()> {
    if manager.schema_exists().await? {
        return Ok(());
    }
    manager.create_if_not_exists().await
}

/// Map "retries exhausted while only losing races" to a plain negative outcome
fn contention_to_none<T>(outcome: Result<T>) -> Result<Option<T>> {
    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(WardenError::RetryExecutionFailed { source: None, .. }) => Ok(None),
        Err(e) => Err(e),
    }
}
