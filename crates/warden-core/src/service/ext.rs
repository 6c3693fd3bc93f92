// Throwing lock API layered over the boolean-returning provider
// Lost races and exhausted retries become typed errors with lock context

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use warden_common::{ResourceId, Result, TimeToLive, WardenError};

use super::handle::LockHandle;
use super::provider::LockProvider;
use super::retry::{RetryPolicy, execute_with_retries};

/// Error-returning counterparts of the [`LockProvider`] operations
///
/// A negative outcome becomes `CouldNotAcquire`, `CouldNotExtend` or
/// `CouldNotRelease`; retries exhausted is attached as the source. Every other
/// error (cancellation, validation, backend failures on single attempts)
/// propagates unchanged.
#[async_trait]
pub trait LockProviderExt {
    async fn acquire(
        &self,
        resource_id: &ResourceId,
        ttl: TimeToLive,
        cancel: &CancellationToken,
    ) -> Result<LockHandle>;

    async fn acquire_with_retries(
        &self,
        resource_id: &ResourceId,
        ttl: TimeToLive,
        policy: &dyn RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<LockHandle>;

    async fn extend(
        &self,
        handle: &LockHandle,
        ttl: TimeToLive,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn extend_with_retries(
        &self,
        handle: &LockHandle,
        ttl: TimeToLive,
        policy: &dyn RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Release and consume the handle; a failed release reaches the caller
    async fn release(&self, handle: LockHandle, cancel: &CancellationToken) -> Result<()>;

    async fn release_with_retries(
        &self,
        handle: LockHandle,
        policy: &dyn RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Run `f` while holding the lock on `resource_id`.
    ///
    /// The lock is acquired under `policy` and released once `f` completes;
    /// a failed release is returned even though `f` already ran.
    async fn with_lock<F, Fut, T>(
        &self,
        resource_id: &ResourceId,
        ttl: TimeToLive,
        policy: &dyn RetryPolicy,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send,
        T: Send;
}

#[async_trait]
impl LockProviderExt for LockProvider {
    async fn acquire(
        &self,
        resource_id: &ResourceId,
        ttl: TimeToLive,
        cancel: &CancellationToken,
    ) -> Result<LockHandle> {
        match self.try_acquire(resource_id, ttl, cancel).await? {
            Some(handle) => Ok(handle),
            None => Err(WardenError::CouldNotAcquire {
                resource_id: resource_id.clone(),
                ttl,
                source: None,
            }),
        }
    }

    async fn acquire_with_retries(
        &self,
        resource_id: &ResourceId,
        ttl: TimeToLive,
        policy: &dyn RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<LockHandle> {
        execute_with_retries(|| self.try_acquire(resource_id, ttl, cancel), policy, cancel)
            .await
            .map_err(|e| match e {
                WardenError::RetryExecutionFailed { .. } => WardenError::CouldNotAcquire {
                    resource_id: resource_id.clone(),
                    ttl,
                    source: Some(Box::new(e)),
                },
                other => other,
            })
    }

    async fn extend(
        &self,
        handle: &LockHandle,
        ttl: TimeToLive,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.try_extend(handle, ttl, cancel).await? {
            return Ok(());
        }
        Err(WardenError::CouldNotExtend {
            resource_id: handle.resource_id().clone(),
            lock_id: *handle.lock_id(),
            ttl,
            source: None,
        })
    }

    async fn extend_with_retries(
        &self,
        handle: &LockHandle,
        ttl: TimeToLive,
        policy: &dyn RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<()> {
        execute_with_retries(
            || async move {
                let extended = handle.try_extend(ttl, cancel).await?;
                Ok::<_, WardenError>(extended.then_some(()))
            },
            policy,
            cancel,
        )
        .await
        .map_err(|e| match e {
            WardenError::RetryExecutionFailed { .. } => WardenError::CouldNotExtend {
                resource_id: handle.resource_id().clone(),
                lock_id: *handle.lock_id(),
                ttl,
                source: Some(Box::new(e)),
            },
            other => other,
        })
    }

    async fn release(&self, mut handle: LockHandle, cancel: &CancellationToken) -> Result<()> {
        if self.try_release(&mut handle, cancel).await? {
            return Ok(());
        }
        Err(WardenError::CouldNotRelease {
            resource_id: handle.resource_id().clone(),
            lock_id: *handle.lock_id(),
            source: None,
        })
    }

    async fn release_with_retries(
        &self,
        mut handle: LockHandle,
        policy: &dyn RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let resource_id = handle.resource_id().clone();
        let lock_id = *handle.lock_id();
        let outcome = self
            .try_release_with_retries(&mut handle, policy, cancel)
            .await;

        match outcome {
            Ok(true) => Ok(()),
            Ok(false) => Err(WardenError::CouldNotRelease {
                resource_id,
                lock_id,
                source: None,
            }),
            Err(e @ WardenError::RetryExecutionFailed { .. }) => {
                Err(WardenError::CouldNotRelease {
                    resource_id,
                    lock_id,
                    source: Some(Box::new(e)),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn with_lock<F, Fut, T>(
        &self,
        resource_id: &ResourceId,
        ttl: TimeToLive,
        policy: &dyn RetryPolicy,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send,
        T: Send,
    {
        let handle = self
            .acquire_with_retries(resource_id, ttl, policy, cancel)
            .await?;
        let output = f().await;
        self.release(handle, cancel).await?;
        Ok(output)
    }
}
