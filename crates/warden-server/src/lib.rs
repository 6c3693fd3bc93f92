//! Warden Server - configuration and backend wiring
//!
//! This crate provides:
//! - `WardenConfig`: layered YAML + environment configuration
//! - `startup::logging`: console and rolling-file tracing setup
//! - `startup::build_provider`: a ready `LockProvider` for the configured backend

pub mod model;
pub mod startup;

pub use model::config::{
    BackendKind, BackoffKind, LogSettings, RedisConfig, RetryConfig, SqlConfig, WardenConfig,
};
pub use startup::{build_provider, retry_policy};
