//! Warden Common - Shared types, traits, and errors
//!
//! This crate provides the foundational types used across all Warden components:
//! - Validated lock value types (`ResourceId`, `LockId`, `TimeToLive`)
//! - The `WardenError` taxonomy
//! - The storage repository and schema provisioning contracts
//! - Identifier validation helpers

pub mod error;
pub mod model;
pub mod traits;
pub mod utils;

// Re-exports for convenience
pub use error::{Result, WardenError};
pub use model::{LockId, ResourceId, TimeToLive};
pub use traits::*;
pub use utils::is_valid_identifier;

/// Default relational table holding lock records
pub const DEFAULT_TABLE_NAME: &str = "distributed_locks";

/// Default key prefix for conditional-write stores
pub const DEFAULT_KEY_PREFIX: &str = "warden:lock";

/// Default advisory lock timeout used while provisioning the schema
pub const DEFAULT_SCHEMA_LOCK_TIMEOUT_MS: u64 = 30_000;

/// Longest resource id an indexed relational column can hold
pub const MAX_SQL_RESOURCE_ID_LEN: usize = 900;
