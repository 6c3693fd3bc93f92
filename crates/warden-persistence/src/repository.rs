// Relational lock repository
// Every operation runs in its own transaction on a shared connection pool

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, Statement, TransactionTrait, Value,
};
use tracing::{debug, warn};
use warden_common::{
    LockId, LockRepository, RepositoryFactory, ResourceId, Result, TimeToLive, WardenError,
};

use crate::dialect::SqlDialect;
use crate::error::{backend, is_unique_violation, is_write_conflict};
use crate::provisioning::SqlSchemaManager;
use crate::schema::{EXPIRES_AT_COLUMN, LOCK_ID_COLUMN, LockTableSchema, RESOURCE_ID_COLUMN};

/// Relational backend settings
#[derive(Debug, Clone)]
pub struct SqlLockOptions {
    /// Schema holding the lock table; the connection default when unset
    pub schema: Option<String>,
    pub table_name: String,
    /// Bound on the wait for the provisioning advisory lock
    pub schema_lock_timeout: Duration,
}

impl Default for SqlLockOptions {
    fn default() -> Self {
        Self {
            schema: None,
            table_name: warden_common::DEFAULT_TABLE_NAME.to_string(),
            schema_lock_timeout: Duration::from_millis(
                warden_common::DEFAULT_SCHEMA_LOCK_TIMEOUT_MS,
            ),
        }
    }
}

impl SqlLockOptions {
    pub fn table(&self) -> Result<LockTableSchema> {
        LockTableSchema::new(self.schema.clone(), self.table_name.clone())
    }
}

/// Pre-rendered statements for one dialect and table
#[derive(Debug)]
pub(crate) struct LockStatements {
    dialect: SqlDialect,
    purge_expired: String,
    purge_all_expired: String,
    /// Row locks taken before writing; SQLite takes none
    lock_resource: Option<String>,
    insert_if_free: String,
    lock_holder: Option<String>,
    extend: String,
    release: String,
}

impl LockStatements {
    pub(crate) fn new(dialect: SqlDialect, table: &LockTableSchema) -> Self {
        let t = table.qualified(dialect);
        let rid = dialect.quote(RESOURCE_ID_COLUMN);
        let lid = dialect.quote(LOCK_ID_COLUMN);
        let exp = dialect.quote(EXPIRES_AT_COLUMN);
        let now = dialect.now_millis();
        let p = |i| dialect.placeholder(i);
        let row_locks = dialect.for_update();
        let locking = |sql: String| (!row_locks.is_empty()).then(|| format!("{sql}{row_locks}"));

        Self {
            dialect,
            purge_expired: format!("DELETE FROM {t} WHERE {rid} = {} AND {exp} <= {now}", p(1)),
            purge_all_expired: format!("DELETE FROM {t} WHERE {exp} <= {now}"),
            lock_resource: locking(format!("SELECT {lid} FROM {t} WHERE {rid} = {}", p(1))),
            insert_if_free: format!(
                "INSERT INTO {t} ({rid}, {lid}, {exp}) SELECT {}, {}, {now} + {}{} \
                 WHERE NOT EXISTS (SELECT 1 FROM {t} WHERE {rid} = {} AND {exp} > {now})",
                p(1),
                p(2),
                p(3),
                dialect.dual(),
                p(4)
            ),
            lock_holder: locking(format!(
                "SELECT {lid} FROM {t} WHERE {rid} = {} AND {lid} = {}",
                p(1),
                p(2)
            )),
            extend: format!(
                "UPDATE {t} SET {exp} = {now} + {} WHERE {rid} = {} AND {lid} = {} AND {exp} > {now}",
                p(1),
                p(2),
                p(3)
            ),
            release: format!(
                "DELETE FROM {t} WHERE {rid} = {} AND {lid} = {} AND {exp} > {now}",
                p(1),
                p(2)
            ),
        }
    }

    fn statement(&self, sql: &str, values: Vec<Value>) -> Statement {
        Statement::from_sql_and_values(self.dialect.backend(), sql, values)
    }
}

/// Map the row count of a single-record write onto its boolean outcome
fn single_row_outcome(operation: &str, rows_affected: u64) -> Result<bool> {
    match rows_affected {
        0 => Ok(false),
        1 => Ok(true),
        n => Err(WardenError::ProtocolViolation(format!(
            "{operation} affected {n} rows, expected 0 or 1"
        ))),
    }
}

/// Lock repository on a relational database
///
/// Acquire, extend and release each run in one transaction: the expiry check
/// and the write see the same database clock, and the predicate lock taken
/// first serializes competitors on the same resource id.
pub struct SqlLockRepository {
    db: Arc<DatabaseConnection>,
    statements: Arc<LockStatements>,
}

impl SqlLockRepository {
    pub fn new(
        db: impl Into<Arc<DatabaseConnection>>,
        options: &SqlLockOptions,
    ) -> Result<Self> {
        let db = db.into();
        let dialect = SqlDialect::from(db.get_database_backend());
        let statements = Arc::new(LockStatements::new(dialect, &options.table()?));
        Ok(Self { db, statements })
    }

    pub fn dialect(&self) -> SqlDialect {
        self.statements.dialect
    }

    fn check_resource_id(&self, resource_id: &ResourceId) -> Result<()> {
        let max = self.dialect().max_resource_id_len();
        if resource_id.char_len() > max {
            return Err(WardenError::InvalidArgument(format!(
                "resource id is {} characters, the {} backend accepts at most {max}",
                resource_id.char_len(),
                self.dialect()
            )));
        }
        Ok(())
    }

    async fn begin(&self, operation: &str) -> Result<DatabaseTransaction> {
        self.db.begin().await.map_err(|e| backend(operation, e))
    }

    async fn exec(
        &self,
        txn: &DatabaseTransaction,
        operation: &str,
        sql: &str,
        values: Vec<Value>,
    ) -> Result<u64> {
        txn.execute(self.statements.statement(sql, values))
            .await
            .map(|result| result.rows_affected())
            .map_err(|e| backend(operation, e))
    }

    /// Delete every expired record, returning how many rows went away
    pub async fn purge_expired(&self) -> Result<u64> {
        let statement = self
            .statements
            .statement(&self.statements.purge_all_expired, vec![]);
        let removed = self
            .db
            .execute(statement)
            .await
            .map_err(|e| backend("purge", e))?
            .rows_affected();
        if removed > 0 {
            debug!(count = removed, "Purged expired lock records");
        }
        Ok(removed)
    }

    async fn acquire_in_txn(
        &self,
        txn: &DatabaseTransaction,
        resource_id: &ResourceId,
        lock_id: &LockId,
        ttl: TimeToLive,
    ) -> std::result::Result<u64, sea_orm::DbErr> {
        let s = &self.statements;
        let rid = resource_id.as_str().to_string();

        txn.execute(s.statement(&s.purge_expired, vec![rid.clone().into()]))
            .await?;
        if let Some(sql) = &s.lock_resource {
            txn.execute(s.statement(sql, vec![rid.clone().into()])).await?;
        }
        let inserted = txn
            .execute(s.statement(
                &s.insert_if_free,
                vec![
                    rid.clone().into(),
                    lock_id.to_string().into(),
                    ttl.as_millis_i64().into(),
                    rid.into(),
                ],
            ))
            .await?;
        Ok(inserted.rows_affected())
    }
}

#[async_trait]
impl LockRepository for SqlLockRepository {
    async fn try_acquire(
        &self,
        resource_id: &ResourceId,
        ttl: TimeToLive,
    ) -> Result<Option<LockId>> {
        self.check_resource_id(resource_id)?;
        let lock_id = LockId::generate();
        let txn = self.begin("acquire").await?;

        let rows = match self.acquire_in_txn(&txn, resource_id, &lock_id, ttl).await {
            Ok(rows) => rows,
            // A concurrent acquirer committed its row first
            Err(e) if is_unique_violation(&e) || is_write_conflict(&e) => {
                debug!(resource_id = %resource_id, error = %e, "Lost acquire race");
                return Ok(None);
            }
            Err(e) => return Err(backend("acquire", e)),
        };

        let acquired = single_row_outcome("acquire", rows)?;
        match txn.commit().await {
            Ok(()) => Ok(acquired.then_some(lock_id)),
            Err(e) if is_unique_violation(&e) || is_write_conflict(&e) => Ok(None),
            Err(e) => Err(backend("acquire commit", e)),
        }
    }

    async fn try_extend(
        &self,
        resource_id: &ResourceId,
        lock_id: &LockId,
        ttl: TimeToLive,
    ) -> Result<bool> {
        self.check_resource_id(resource_id)?;
        let s = &self.statements;
        let rid = resource_id.as_str().to_string();
        let lid = lock_id.to_string();
        let txn = self.begin("extend").await?;

        if let Some(sql) = &s.lock_holder {
            self.exec(&txn, "extend", sql, vec![rid.clone().into(), lid.clone().into()])
                .await?;
        }
        let rows = self
            .exec(
                &txn,
                "extend",
                &s.extend,
                vec![ttl.as_millis_i64().into(), rid.into(), lid.into()],
            )
            .await?;

        let extended = single_row_outcome("extend", rows)?;
        txn.commit()
            .await
            .map_err(|e| backend("extend commit", e))?;
        Ok(extended)
    }

    async fn try_release(&self, resource_id: &ResourceId, lock_id: &LockId) -> Result<bool> {
        self.check_resource_id(resource_id)?;
        let s = &self.statements;
        let rid = resource_id.as_str().to_string();
        let lid = lock_id.to_string();
        let txn = self.begin("release").await?;

        if let Some(sql) = &s.lock_holder {
            self.exec(&txn, "release", sql, vec![rid.clone().into(), lid.clone().into()])
                .await?;
        }
        let rows = self
            .exec(&txn, "release", &s.release, vec![rid.into(), lid.into()])
            .await?;

        let released = single_row_outcome("release", rows)?;
        txn.commit()
            .await
            .map_err(|e| backend("release commit", e))?;
        Ok(released)
    }
}

/// Hands out repositories sharing one connection pool
#[derive(Clone)]
pub struct SqlRepositoryFactory {
    db: Arc<DatabaseConnection>,
    options: SqlLockOptions,
    statements: Arc<LockStatements>,
}

impl SqlRepositoryFactory {
    pub fn new(
        db: impl Into<Arc<DatabaseConnection>>,
        options: SqlLockOptions,
    ) -> Result<Self> {
        let db = db.into();
        let dialect = SqlDialect::from(db.get_database_backend());
        let table = options.table()?;
        if dialect == SqlDialect::Sqlite && table.schema().is_some() {
            warn!("SQLite has no schemas; the configured schema is used as an attached database name");
        }
        let statements = Arc::new(LockStatements::new(dialect, &table));
        Ok(Self {
            db,
            options,
            statements,
        })
    }

    pub fn options(&self) -> &SqlLockOptions {
        &self.options
    }

    /// Repository sharing this factory's pool, for maintenance such as purging
    pub fn repository(&self) -> SqlLockRepository {
        SqlLockRepository {
            db: Arc::clone(&self.db),
            statements: Arc::clone(&self.statements),
        }
    }

    /// Schema manager provisioning the table this factory writes to
    pub fn schema_manager(&self) -> Result<SqlSchemaManager> {
        SqlSchemaManager::new(Arc::clone(&self.db), &self.options)
    }
}

impl RepositoryFactory for SqlRepositoryFactory {
    fn create(&self) -> Result<Box<dyn LockRepository>> {
        Ok(Box::new(self.repository()))
    }
}

impl std::fmt::Debug for SqlRepositoryFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlRepositoryFactory")
            .field("dialect", &self.statements.dialect)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    use super::*;

    fn exec(rows_affected: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected,
        }
    }

    fn mock_repository(
        backend: DatabaseBackend,
        results: Vec<MockExecResult>,
    ) -> SqlLockRepository {
        let db = MockDatabase::new(backend)
            .append_exec_results(results)
            .into_connection();
        SqlLockRepository::new(db, &SqlLockOptions::default()).unwrap()
    }

    fn resource(name: &str) -> ResourceId {
        ResourceId::new(name).unwrap()
    }

    fn ttl() -> TimeToLive {
        TimeToLive::from_secs(30).unwrap()
    }

    #[test]
    fn test_single_row_outcome() {
        assert!(!single_row_outcome("release", 0).unwrap());
        assert!(single_row_outcome("release", 1).unwrap());
        assert!(matches!(
            single_row_outcome("release", 2),
            Err(WardenError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_postgres_statements() {
        let statements = LockStatements::new(SqlDialect::Postgres, &LockTableSchema::default());
        assert!(statements.lock_resource.unwrap().ends_with("FOR UPDATE"));
        assert!(statements.insert_if_free.contains("SELECT $1, $2, "));
        assert!(statements.insert_if_free.contains("\"resource_id\" = $4"));
        assert!(statements.extend.starts_with("UPDATE \"distributed_locks\" SET"));
    }

    #[test]
    fn test_mysql_insert_selects_from_dual() {
        let statements = LockStatements::new(SqlDialect::MySql, &LockTableSchema::default());
        assert!(statements.insert_if_free.contains("FROM DUAL WHERE NOT EXISTS"));
        assert!(!statements.insert_if_free.contains('$'));
    }

    #[test]
    fn test_sqlite_skips_row_locks() {
        let statements = LockStatements::new(SqlDialect::Sqlite, &LockTableSchema::default());
        assert!(statements.lock_resource.is_none());
        assert!(statements.lock_holder.is_none());
        assert!(statements.purge_expired.contains("julianday('now')"));
    }

    #[tokio::test]
    async fn test_acquire_inserted_row_returns_lock_id() {
        let repo = mock_repository(DatabaseBackend::Postgres, vec![exec(0), exec(0), exec(1)]);
        assert!(repo.try_acquire(&resource("jobs"), ttl()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_acquire_live_holder_returns_none() {
        let repo = mock_repository(DatabaseBackend::Postgres, vec![exec(1), exec(1), exec(0)]);
        assert!(repo.try_acquire(&resource("jobs"), ttl()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_acquire_multiple_rows_is_protocol_violation() {
        let repo = mock_repository(DatabaseBackend::MySql, vec![exec(0), exec(0), exec(2)]);
        let err = repo.try_acquire(&resource("jobs"), ttl()).await.unwrap_err();
        assert!(matches!(err, WardenError::ProtocolViolation(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_extend_and_release_row_counts() {
        let repo = mock_repository(
            DatabaseBackend::Postgres,
            vec![exec(1), exec(1), exec(0), exec(0)],
        );
        let key = resource("jobs");
        let lock_id = LockId::generate();

        assert!(repo.try_extend(&key, &lock_id, ttl()).await.unwrap());
        assert!(!repo.try_release(&key, &lock_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_multiple_rows_is_protocol_violation() {
        let repo = mock_repository(DatabaseBackend::Sqlite, vec![exec(3)]);
        let err = repo
            .try_release(&resource("jobs"), &LockId::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn test_oversized_resource_id_is_rejected() {
        let repo = mock_repository(DatabaseBackend::MySql, vec![]);
        let key = resource(&"r".repeat(800));
        let err = repo.try_acquire(&key, ttl()).await.unwrap_err();
        assert!(matches!(err, WardenError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_factory_creates_repositories() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(0), exec(0), exec(1)])
            .into_connection();
        let factory = SqlRepositoryFactory::new(db, SqlLockOptions::default()).unwrap();

        let repository = factory.create().unwrap();
        assert!(
            repository
                .try_acquire(&resource("jobs"), ttl())
                .await
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_factory_rejects_bad_table_name() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let options = SqlLockOptions {
            table_name: "locks table".to_string(),
            ..Default::default()
        };
        assert!(SqlRepositoryFactory::new(db, options).is_err());
    }
}
