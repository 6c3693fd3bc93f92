//! Database test utilities
//!
//! SQLite databases live in a temporary directory; MySQL and PostgreSQL
//! are reached through `TEST_DATABASE_URL`.

#![allow(dead_code)]

use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use tempfile::TempDir;
use warden_persistence::{SqlLockOptions, SqlRepositoryFactory};

/// Test database wrapper
pub struct TestDatabase {
    pub connection: Arc<DatabaseConnection>,
    /// Keeps the SQLite file alive for the duration of the test
    _dir: Option<TempDir>,
}

impl TestDatabase {
    /// Fresh SQLite database file
    pub async fn sqlite() -> Result<Self, DbErr> {
        let dir = tempfile::tempdir().map_err(|e| DbErr::Custom(e.to_string()))?;
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("locks.db").display());
        let mut options = ConnectOptions::new(url);
        options.max_connections(8).sqlx_logging(false);

        Ok(Self {
            connection: Arc::new(Database::connect(options).await?),
            _dir: Some(dir),
        })
    }

    /// Database named by `TEST_DATABASE_URL`
    pub async fn from_env() -> Result<Self, DbErr> {
        let url = env::var("TEST_DATABASE_URL")
            .map_err(|_| DbErr::Custom("TEST_DATABASE_URL not set".to_string()))?;
        let mut options = ConnectOptions::new(url);
        options.max_connections(16).sqlx_logging(false);

        Ok(Self {
            connection: Arc::new(Database::connect(options).await?),
            _dir: None,
        })
    }

    /// Factory writing to a table unique to the calling test
    pub fn factory(&self, prefix: &str) -> SqlRepositoryFactory {
        let options = SqlLockOptions {
            table_name: unique_table_name(prefix),
            ..Default::default()
        };
        SqlRepositoryFactory::new(Arc::clone(&self.connection), options)
            .expect("valid lock options")
    }
}

static TABLE_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Generate a unique table name so parallel tests never share a table
pub fn unique_table_name(prefix: &str) -> String {
    let n = TABLE_COUNTER.fetch_add(1, Ordering::SeqCst);
    let pid = std::process::id();
    format!("{prefix}_{pid}_{n}")
}
