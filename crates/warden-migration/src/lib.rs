//! Warden Migration - versioned schema for the relational lock table
//!
//! `Migrator` runs through the SeaORM migration framework for deployments
//! that manage schema out of band and keep the default table name.
//! `LockTableMigrator` applies the same migration to a configured table
//! location. `scripts` renders the same DDL as plain SQL for DBAs applying
//! it by hand.

pub use sea_orm_migration::prelude::*;

mod m20240601_000001_create_distributed_locks;
pub mod scripts;

use sea_orm_migration::sea_orm::DatabaseConnection;
use warden_persistence::LockTableSchema;

pub use m20240601_000001_create_distributed_locks::Migration as CreateLockTable;
pub use scripts::{SchemaScript, scripts, scripts_for};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(CreateLockTable::default())]
    }
}

/// Applies the lock table migration to one table location.
///
/// The statements are idempotent, so running `up` against a table that
/// runtime provisioning already created is a no-op.
#[derive(Debug, Clone)]
pub struct LockTableMigrator {
    migration: CreateLockTable,
}

impl LockTableMigrator {
    pub fn new(table: LockTableSchema) -> Self {
        Self {
            migration: CreateLockTable::new(table),
        }
    }

    pub async fn up(&self, db: &DatabaseConnection) -> Result<(), DbErr> {
        self.migration.up(&SchemaManager::new(db)).await
    }

    pub async fn down(&self, db: &DatabaseConnection) -> Result<(), DbErr> {
        self.migration.down(&SchemaManager::new(db)).await
    }
}
