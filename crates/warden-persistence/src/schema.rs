// Lock table definition
// Shared by runtime provisioning and the migration crate

use sea_orm::sea_query::{
    Alias, ColumnDef, Index, IndexCreateStatement, IntoTableRef, Table, TableCreateStatement,
    TableRef,
};
use sea_orm::{ConnectionTrait, Statement};
use warden_common::{Result, WardenError, is_valid_identifier};

use crate::dialect::SqlDialect;

pub const RESOURCE_ID_COLUMN: &str = "resource_id";
pub const LOCK_ID_COLUMN: &str = "lock_id";
pub const EXPIRES_AT_COLUMN: &str = "expires_at";

/// Longest table name accepted, leaving room for the derived index names
/// within the 63-character identifier limit
pub const MAX_TABLE_NAME_LEN: usize = 40;

/// Location and layout of the lock table
///
/// Columns:
/// - `resource_id`: primary key, the locked resource
/// - `lock_id`: unique, textual UUID of the current holder
/// - `expires_at`: BIGINT epoch milliseconds on the database clock
///
/// Secondary indexes cover `(resource_id, expires_at)` and `(lock_id, expires_at)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTableSchema {
    schema: Option<String>,
    table_name: String,
}

impl LockTableSchema {
    pub fn new(schema: Option<String>, table_name: impl Into<String>) -> Result<Self> {
        let table_name = table_name.into();
        if !is_valid_identifier(&table_name) || table_name.len() > MAX_TABLE_NAME_LEN {
            return Err(WardenError::InvalidArgument(format!(
                "invalid lock table name '{table_name}'"
            )));
        }
        if let Some(schema) = &schema
            && !is_valid_identifier(schema)
        {
            return Err(WardenError::InvalidArgument(format!(
                "invalid schema name '{schema}'"
            )));
        }
        Ok(Self { schema, table_name })
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Quoted, qualified table reference for hand-written statements
    pub fn qualified(&self, dialect: SqlDialect) -> String {
        dialect.table_ref(self.schema(), &self.table_name)
    }

    /// Name of the advisory lock serializing provisioning of this table
    pub fn advisory_lock_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("warden:schema:{schema}.{}", self.table_name),
            None => format!("warden:schema:{}", self.table_name),
        }
    }

    pub fn resource_index_name(&self) -> String {
        format!("ix_{}_resource_expires", self.table_name)
    }

    pub fn lock_index_name(&self) -> String {
        format!("ix_{}_lock_expires", self.table_name)
    }

    pub fn table_ref(&self) -> TableRef {
        match &self.schema {
            Some(schema) => (Alias::new(schema), Alias::new(&self.table_name)).into_table_ref(),
            None => Alias::new(&self.table_name).into_table_ref(),
        }
    }

    pub fn create_table(&self, dialect: SqlDialect) -> TableCreateStatement {
        Table::create()
            .table(self.table_ref())
            .if_not_exists()
            .col(
                ColumnDef::new(Alias::new(RESOURCE_ID_COLUMN))
                    .string_len(dialect.max_resource_id_len() as u32)
                    .not_null()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(Alias::new(LOCK_ID_COLUMN))
                    .string_len(36)
                    .not_null()
                    .unique_key(),
            )
            .col(
                ColumnDef::new(Alias::new(EXPIRES_AT_COLUMN))
                    .big_integer()
                    .not_null(),
            )
            .to_owned()
    }

    /// Secondary indexes.
    ///
    /// MySQL has no `CREATE INDEX IF NOT EXISTS`; there the indexes are only
    /// created together with the table while the schema lock is held.
    pub fn create_indexes(&self, dialect: SqlDialect) -> Vec<IndexCreateStatement> {
        let index = |name: String, leading: &str| {
            let mut stmt = Index::create();
            stmt.name(name)
                .table(self.table_ref())
                .col(Alias::new(leading))
                .col(Alias::new(EXPIRES_AT_COLUMN));
            if dialect != SqlDialect::MySql {
                stmt.if_not_exists();
            }
            stmt
        };

        vec![
            index(self.resource_index_name(), RESOURCE_ID_COLUMN),
            index(self.lock_index_name(), LOCK_ID_COLUMN),
        ]
    }

    /// Every DDL statement creating the table and its indexes, in order
    pub fn ddl(&self, dialect: SqlDialect) -> Vec<Statement> {
        let backend = dialect.backend();
        let mut statements = vec![backend.build(&self.create_table(dialect))];
        statements.extend(
            self.create_indexes(dialect)
                .iter()
                .map(|index| backend.build(index)),
        );
        statements
    }

    /// Execute the DDL on `conn`
    pub async fn create<C>(&self, conn: &C) -> std::result::Result<(), sea_orm::DbErr>
    where
        C: ConnectionTrait,
    {
        let dialect = SqlDialect::from(conn.get_database_backend());
        for statement in self.ddl(dialect) {
            conn.execute(statement).await?;
        }
        Ok(())
    }
}

impl Default for LockTableSchema {
    fn default() -> Self {
        Self {
            schema: None,
            table_name: warden_common::DEFAULT_TABLE_NAME.to_string(),
        }
    }
}
