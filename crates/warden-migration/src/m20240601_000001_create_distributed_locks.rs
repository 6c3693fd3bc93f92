use sea_orm_migration::prelude::*;
use warden_persistence::{LockTableSchema, SqlDialect};

/// Creates the lock table and its indexes at a configurable location
#[derive(Debug, Clone, Default)]
pub struct Migration {
    table: LockTableSchema,
}

impl Migration {
    pub fn new(table: LockTableSchema) -> Self {
        Self { table }
    }
}

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20240601_000001_create_distributed_locks"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let dialect = SqlDialect::from(manager.get_database_backend());

        // MySQL indexes lack IF NOT EXISTS; an existing table already has them
        if dialect == SqlDialect::MySql
            && self.table.schema().is_none()
            && manager.has_table(self.table.table_name()).await?
        {
            return Ok(());
        }

        manager.create_table(self.table.create_table(dialect)).await?;
        for index in self.table.create_indexes(dialect) {
            manager.create_index(index).await?;
        }
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(self.table.table_ref())
                    .if_exists()
                    .to_owned(),
            )
            .await
    }
}
