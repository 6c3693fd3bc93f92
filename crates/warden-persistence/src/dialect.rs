// SQL dialect differences for the lock table
// Identifier quoting, placeholders and the database clock expression

use sea_orm::DbBackend;

/// Supported relational dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    MySql,
    Postgres,
    Sqlite,
}

impl SqlDialect {
    pub fn backend(self) -> DbBackend {
        match self {
            SqlDialect::MySql => DbBackend::MySql,
            SqlDialect::Postgres => DbBackend::Postgres,
            SqlDialect::Sqlite => DbBackend::Sqlite,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SqlDialect::MySql => "mysql",
            SqlDialect::Postgres => "postgres",
            SqlDialect::Sqlite => "sqlite",
        }
    }

    /// Quote a validated identifier
    pub fn quote(self, ident: &str) -> String {
        match self {
            SqlDialect::MySql => format!("`{ident}`"),
            SqlDialect::Postgres | SqlDialect::Sqlite => format!("\"{ident}\""),
        }
    }

    /// Positional parameter marker, 1-based
    pub fn placeholder(self, index: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${index}"),
            SqlDialect::MySql | SqlDialect::Sqlite => "?".to_string(),
        }
    }

    /// Current database time as integer epoch milliseconds
    pub fn now_millis(self) -> &'static str {
        match self {
            SqlDialect::MySql => "CAST(UNIX_TIMESTAMP(CURRENT_TIMESTAMP(3)) * 1000 AS SIGNED)",
            SqlDialect::Postgres => "CAST(EXTRACT(EPOCH FROM clock_timestamp()) * 1000 AS BIGINT)",
            SqlDialect::Sqlite => "CAST((julianday('now') - 2440587.5) * 86400000.0 AS INTEGER)",
        }
    }

    /// Row-locking suffix for the predicate lock taken before a write.
    ///
    /// SQLite serializes writers at the database level and has no row locks.
    pub fn for_update(self) -> &'static str {
        match self {
            SqlDialect::MySql | SqlDialect::Postgres => " FOR UPDATE",
            SqlDialect::Sqlite => "",
        }
    }

    /// `FROM` clause needed by a table-less `SELECT ... WHERE`
    pub fn dual(self) -> &'static str {
        match self {
            SqlDialect::MySql => " FROM DUAL",
            SqlDialect::Postgres | SqlDialect::Sqlite => "",
        }
    }

    /// Longest resource id the primary key and both secondary indexes can hold.
    ///
    /// InnoDB caps index keys at 3072 bytes; with utf8mb4 and the trailing
    /// BIGINT of the composite index that leaves 766 characters.
    pub fn max_resource_id_len(self) -> usize {
        match self {
            SqlDialect::MySql => 766,
            SqlDialect::Postgres | SqlDialect::Sqlite => warden_common::MAX_SQL_RESOURCE_ID_LEN,
        }
    }

    /// Qualified, quoted table reference
    pub fn table_ref(self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(schema) => format!("{}.{}", self.quote(schema), self.quote(table)),
            None => self.quote(table),
        }
    }
}

impl From<DbBackend> for SqlDialect {
    fn from(backend: DbBackend) -> Self {
        match backend {
            DbBackend::MySql => SqlDialect::MySql,
            DbBackend::Postgres => SqlDialect::Postgres,
            DbBackend::Sqlite => SqlDialect::Sqlite,
        }
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for SqlDialect {
    type Err = warden_common::WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(SqlDialect::MySql),
            "postgres" | "postgresql" | "pg" => Ok(SqlDialect::Postgres),
            "sqlite" => Ok(SqlDialect::Sqlite),
            other => Err(warden_common::WardenError::Configuration(format!(
                "unsupported sql dialect '{other}'"
            ))),
        }
    }
}
