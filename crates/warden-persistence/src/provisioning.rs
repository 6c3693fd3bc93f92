// Schema provisioning under a database advisory lock
// Concurrent callers across processes create the lock table exactly once

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr, Statement, TransactionTrait,
    Value,
};
use tracing::{debug, info, warn};
use warden_common::{Result, SchemaManager, WardenError};

use crate::dialect::SqlDialect;
use crate::error::{backend, sqlstate};
use crate::repository::SqlLockOptions;
use crate::schema::LockTableSchema;

/// Outcome of asking the database for the provisioning advisory lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvisoryLockStatus {
    Granted,
    TimedOut,
    /// Deadlock or serialization failure while waiting
    Conflict(String),
    /// Anything else; never retried
    Failed(String),
}

impl AdvisoryLockStatus {
    /// Classify the value returned by MySQL `GET_LOCK`
    pub fn from_mysql(result: Option<i64>) -> Self {
        match result {
            Some(1) => AdvisoryLockStatus::Granted,
            Some(0) => AdvisoryLockStatus::TimedOut,
            Some(other) => AdvisoryLockStatus::Failed(format!("GET_LOCK returned {other}")),
            None => AdvisoryLockStatus::Failed("GET_LOCK returned NULL".to_string()),
        }
    }

    /// Classify a PostgreSQL error raised by `pg_advisory_xact_lock`
    pub fn from_postgres_error(sqlstate: Option<&str>, message: String) -> Self {
        match sqlstate {
            // lock_not_available, query_canceled
            Some("55P03") | Some("57014") => AdvisoryLockStatus::TimedOut,
            // deadlock_detected, serialization_failure
            Some("40P01") | Some("40001") => AdvisoryLockStatus::Conflict(message),
            _ => AdvisoryLockStatus::Failed(message),
        }
    }

    pub fn into_result(self, name: &str) -> Result<()> {
        match self {
            AdvisoryLockStatus::Granted => Ok(()),
            AdvisoryLockStatus::TimedOut => Err(WardenError::SchemaLockTimeout(name.to_string())),
            AdvisoryLockStatus::Conflict(reason) => Err(WardenError::SchemaLockConflict {
                name: name.to_string(),
                reason,
            }),
            AdvisoryLockStatus::Failed(reason) => Err(WardenError::Schema(format!(
                "advisory lock '{name}' failed: {reason}"
            ))),
        }
    }
}

/// Provisions the relational lock table
pub struct SqlSchemaManager {
    db: Arc<DatabaseConnection>,
    dialect: SqlDialect,
    table: LockTableSchema,
    lock_timeout: Duration,
}

impl SqlSchemaManager {
    pub fn new(
        db: impl Into<Arc<DatabaseConnection>>,
        options: &SqlLockOptions,
    ) -> Result<Self> {
        let db = db.into();
        let dialect = SqlDialect::from(db.get_database_backend());
        Ok(Self {
            db,
            dialect,
            table: options.table()?,
            lock_timeout: options.schema_lock_timeout,
        })
    }

    pub fn table(&self) -> &LockTableSchema {
        &self.table
    }

    fn statement(&self, sql: &str, values: Vec<Value>) -> Statement {
        Statement::from_sql_and_values(self.dialect.backend(), sql, values)
    }

    fn exists_statement(&self) -> Statement {
        let table = self.table.table_name().to_string();
        match self.dialect {
            SqlDialect::MySql => match self.table.schema() {
                Some(schema) => self.statement(
                    "SELECT COUNT(*) FROM information_schema.tables \
                     WHERE table_schema = ? AND table_name = ?",
                    vec![schema.into(), table.into()],
                ),
                None => self.statement(
                    "SELECT COUNT(*) FROM information_schema.tables \
                     WHERE table_schema = DATABASE() AND table_name = ?",
                    vec![table.into()],
                ),
            },
            SqlDialect::Postgres => self.statement(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = COALESCE($1, current_schema()) AND table_name = $2",
                vec![self.table.schema().map(str::to_string).into(), table.into()],
            ),
            SqlDialect::Sqlite => {
                let master = match self.table.schema() {
                    Some(schema) => format!("{}.sqlite_master", self.dialect.quote(schema)),
                    None => "sqlite_master".to_string(),
                };
                self.statement(
                    &format!("SELECT COUNT(*) FROM {master} WHERE type = 'table' AND name = ?"),
                    vec![table.into()],
                )
            }
        }
    }

    async fn table_exists<C: ConnectionTrait>(&self, conn: &C) -> std::result::Result<bool, DbErr> {
        let row = conn.query_one(self.exists_statement()).await?;
        let count = match row {
            Some(row) => row.try_get_by_index::<i64>(0)?,
            None => 0,
        };
        Ok(count > 0)
    }

    /// Take the advisory lock; the caller owns the transaction that pins the
    /// session for its whole lifetime
    async fn acquire_advisory_lock(&self, txn: &DatabaseTransaction) -> Result<()> {
        let name = self.table.advisory_lock_name();
        let status = match self.dialect {
            SqlDialect::MySql => {
                // GET_LOCK takes whole seconds
                let timeout_secs = self.lock_timeout.as_millis().div_ceil(1000) as i64;
                let row = txn
                    .query_one(self.statement(
                        "SELECT GET_LOCK(?, ?)",
                        vec![name.clone().into(), timeout_secs.into()],
                    ))
                    .await
                    .map_err(|e| WardenError::Schema(format!("GET_LOCK failed: {e}")))?;
                let result = match row {
                    Some(row) => row
                        .try_get_by_index::<Option<i64>>(0)
                        .map_err(|e| WardenError::Schema(format!("GET_LOCK result: {e}")))?,
                    None => None,
                };
                AdvisoryLockStatus::from_mysql(result)
            }
            SqlDialect::Postgres => {
                let timeout_ms = self.lock_timeout.as_millis().max(1);
                txn.execute_unprepared(&format!("SET LOCAL lock_timeout = '{timeout_ms}ms'"))
                    .await
                    .map_err(|e| WardenError::Schema(format!("set lock_timeout failed: {e}")))?;
                match txn
                    .execute(self.statement(
                        "SELECT pg_advisory_xact_lock(hashtext($1))",
                        vec![name.clone().into()],
                    ))
                    .await
                {
                    Ok(_) => AdvisoryLockStatus::Granted,
                    Err(e) => {
                        let code = sqlstate(&e);
                        AdvisoryLockStatus::from_postgres_error(code.as_deref(), e.to_string())
                    }
                }
            }
            // Writers are serialized by the database file lock
            SqlDialect::Sqlite => AdvisoryLockStatus::Granted,
        };

        debug!(lock = %name, status = ?status, "Schema advisory lock requested");
        status.into_result(&name)
    }

    async fn release_advisory_lock(&self, txn: &DatabaseTransaction) {
        if self.dialect != SqlDialect::MySql {
            return;
        }
        let name = self.table.advisory_lock_name();
        if let Err(e) = txn
            .execute(self.statement("SELECT RELEASE_LOCK(?)", vec![name.clone().into()]))
            .await
        {
            warn!(lock = %name, error = %e, "Failed to release schema advisory lock");
        }
    }

    async fn provision(&self, txn: &DatabaseTransaction) -> Result<()> {
        self.acquire_advisory_lock(txn).await?;

        let outcome = async {
            // SQLite must write first so the busy handler covers the file
            // lock; every statement there is IF NOT EXISTS
            if self.dialect != SqlDialect::Sqlite
                && self
                    .table_exists(txn)
                    .await
                    .map_err(|e| backend("schema check", e))?
            {
                debug!(table = %self.table.table_name(), "Lock table already exists");
                return Ok(());
            }
            self.table
                .create(txn)
                .await
                .map_err(|e| WardenError::Schema(format!("create lock table failed: {e}")))?;
            info!(
                table = %self.table.table_name(),
                dialect = %self.dialect,
                "Created lock table"
            );
            Ok::<_, WardenError>(())
        }
        .await;

        self.release_advisory_lock(txn).await;
        outcome
    }
}

#[async_trait]
impl SchemaManager for SqlSchemaManager {
    async fn schema_exists(&self) -> Result<bool> {
        self.table_exists(self.db.as_ref())
            .await
            .map_err(|e| backend("schema check", e))
    }

    async fn create_if_not_exists(&self) -> Result<()> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| backend("schema transaction", e))?;

        self.provision(&txn).await?;

        txn.commit()
            .await
            .map_err(|e| backend("schema commit", e))
    }
}

impl std::fmt::Debug for SqlSchemaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlSchemaManager")
            .field("dialect", &self.dialect)
            .field("table", &self.table)
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}
