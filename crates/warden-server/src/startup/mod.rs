//! Backend wiring
//!
//! Turns a [`WardenConfig`] into a ready [`LockProvider`].

pub mod logging;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tracing::info;
use warden_core::{LockProvider, MemoryLockRepository, RetryDelay, TimeoutRetryPolicy};
use warden_persistence::{SqlLockOptions, SqlRepositoryFactory};
use warden_redis::RedisRepositoryFactory;

use crate::model::config::{BackendKind, BackoffKind, RetryConfig, SqlConfig, WardenConfig};

/// Open the SeaORM connection pool described by `config`
pub async fn database_connection(config: &SqlConfig) -> anyhow::Result<DatabaseConnection> {
    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .sqlx_logging(config.sqlx_logging);

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        connect_timeout = config.connect_timeout_secs,
        "Database connection pool configured"
    );

    Database::connect(opt)
        .await
        .context("failed to connect to the lock database")
}

/// SQL backend options from configuration
pub fn sql_options(config: &SqlConfig) -> SqlLockOptions {
    SqlLockOptions {
        schema: config.schema.clone(),
        table_name: config.table_name.clone(),
        schema_lock_timeout: Duration::from_millis(config.schema_lock_timeout_ms),
    }
}

/// Connect the configured backend and return a provider over it
pub async fn build_provider(config: &WardenConfig) -> anyhow::Result<LockProvider> {
    config.validate()?;

    let provider = match config.backend {
        BackendKind::Sql => {
            let db = database_connection(&config.sql).await?;
            let factory = SqlRepositoryFactory::new(db, sql_options(&config.sql))?;
            let schema_manager = factory.schema_manager()?;
            info!(table = %config.sql.table_name, "Using SQL lock backend");
            LockProvider::new(Arc::new(factory)).with_schema_manager(Arc::new(schema_manager))
        }
        BackendKind::Redis => {
            let factory =
                RedisRepositoryFactory::connect(&config.redis.url, config.redis.key_prefix.clone())
                    .await
                    .context("failed to connect to redis")?;
            let schema_manager = factory.schema_manager();
            info!(key_prefix = %config.redis.key_prefix, "Using Redis lock backend");
            LockProvider::new(Arc::new(factory)).with_schema_manager(Arc::new(schema_manager))
        }
        BackendKind::Memory => {
            info!("Using in-memory lock backend");
            LockProvider::new(Arc::new(MemoryLockRepository::new()))
        }
    };

    Ok(provider)
}

/// Retry policy from configuration
pub fn retry_policy(config: &RetryConfig) -> TimeoutRetryPolicy {
    let delay = match config.backoff {
        BackoffKind::Fixed => RetryDelay::Fixed(config.delay()),
        BackoffKind::Linear => RetryDelay::Linear {
            step: config.delay(),
            max: config.max_delay(),
        },
        BackoffKind::Exponential => RetryDelay::Exponential {
            base: config.delay(),
            max: config.max_delay(),
        },
    };
    TimeoutRetryPolicy::new(config.timeout(), delay)
}
