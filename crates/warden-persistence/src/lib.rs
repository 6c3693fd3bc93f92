//! Warden Persistence - relational lock storage
//!
//! This crate provides:
//! - `SqlLockRepository`: the transactional lock repository
//! - `SqlRepositoryFactory`: a per-operation repository factory over a shared pool
//! - `SqlSchemaManager`: advisory-lock-guarded provisioning of the lock table
//! - `LockTableSchema`: the table and index definitions shared with migrations
//!
//! MySQL, PostgreSQL and SQLite are supported. The database clock is the only
//! clock consulted, so competing processes never compare their local times.

pub mod dialect;
pub mod error;
pub mod provisioning;
pub mod repository;
pub mod schema;

// Re-export sea-orm for convenience
pub use sea_orm;

pub use dialect::SqlDialect;
pub use provisioning::{AdvisoryLockStatus, SqlSchemaManager};
pub use repository::{SqlLockOptions, SqlLockRepository, SqlRepositoryFactory};
pub use schema::LockTableSchema;
