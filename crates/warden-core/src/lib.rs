//! Warden Core - lock orchestration on top of a storage repository
//!
//! This crate provides:
//! - `LockProvider`: the boolean-returning lock facade
//! - `LockProviderExt`: the throwing facade built over the boolean one
//! - `LockHandle`: a held lock that releases itself on drop
//! - The bounded retry execution engine and its policies
//! - `MemoryLockRepository`: an in-process backend

pub mod service;

pub use service::ext::LockProviderExt;
pub use service::handle::LockHandle;
pub use service::memory::MemoryLockRepository;
pub use service::provider::LockProvider;
pub use service::retry::{
    NoRetryPolicy, RetryDelay, RetryExecutionMetadata, RetryPolicy, TimeoutRetryPolicy,
    execute_with_retries,
};

pub use tokio_util::sync::CancellationToken;
pub use warden_common::{LockId, ResourceId, Result, TimeToLive, WardenError};
