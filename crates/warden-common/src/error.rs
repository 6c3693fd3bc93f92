//! Error types for Warden
//!
//! `WardenError` covers every failure the lock stack can surface:
//! - validation errors raised while constructing value types
//! - transient backend failures and backend protocol violations
//! - schema provisioning lock outcomes
//! - retries exhausted and cancellation
//! - the domain-level could-not-acquire/extend/release errors of the throwing API

use std::time::Duration;

use crate::model::{LockId, ResourceId, TimeToLive};

/// Boxed source error carried by backend failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout Warden
pub type Result<T> = std::result::Result<T, WardenError>;

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum WardenError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("backend error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("backend protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("timed out waiting for schema lock '{0}'")]
    SchemaLockTimeout(String),

    #[error("schema lock '{name}' conflict: {reason}")]
    SchemaLockConflict { name: String, reason: String },

    #[error("schema provisioning failed: {0}")]
    Schema(String),

    #[error("retries exhausted after {attempts} attempt(s) in {elapsed:?}")]
    RetryExecutionFailed {
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: Option<Box<WardenError>>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("could not acquire lock on '{resource_id}' with ttl {ttl}")]
    CouldNotAcquire {
        resource_id: ResourceId,
        ttl: TimeToLive,
        #[source]
        source: Option<Box<WardenError>>,
    },

    #[error("could not extend lock {lock_id} on '{resource_id}' with ttl {ttl}")]
    CouldNotExtend {
        resource_id: ResourceId,
        lock_id: LockId,
        ttl: TimeToLive,
        #[source]
        source: Option<Box<WardenError>>,
    },

    #[error("could not release lock {lock_id} on '{resource_id}'")]
    CouldNotRelease {
        resource_id: ResourceId,
        lock_id: LockId,
        #[source]
        source: Option<Box<WardenError>>,
    },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl WardenError {
    /// Build a backend error wrapping the underlying driver error
    pub fn backend<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        WardenError::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether the failure is transient and may succeed on a later attempt.
    ///
    /// Validation errors, protocol violations and fatal schema errors are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WardenError::Backend { .. }
                | WardenError::SchemaLockTimeout(_)
                | WardenError::SchemaLockConflict { .. }
        )
    }

    /// Whether this error is the retry engine giving up
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, WardenError::RetryExecutionFailed { .. })
    }
}
