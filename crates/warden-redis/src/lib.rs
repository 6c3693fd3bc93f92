//! Warden Redis - conditional-write lock storage
//!
//! Each lock is a single key holding the lock id, with the lease as the key's
//! expiry. Acquire is `SET NX PX`; extend and release are Lua scripts that
//! compare the stored lock id before touching the key, so the check and the
//! write are one atomic server-side step.

mod repository;
mod scripts;

pub use repository::{RedisLockRepository, RedisRepositoryFactory, RedisSchemaManager};
