// Plain SQL rendering of the lock table DDL

use warden_persistence::{LockTableSchema, SqlDialect};

/// One named SQL file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaScript {
    pub name: String,
    pub content: String,
}

/// DDL for the default lock table in `dialect`, in application order
pub fn scripts(dialect: SqlDialect) -> Vec<SchemaScript> {
    scripts_for(dialect, &LockTableSchema::default())
}

/// DDL for a custom table location
pub fn scripts_for(dialect: SqlDialect, table: &LockTableSchema) -> Vec<SchemaScript> {
    let content = table
        .ddl(dialect)
        .iter()
        .map(|statement| format!("{statement};\n"))
        .collect::<String>();

    vec![SchemaScript {
        name: format!("{dialect}/001_create_{}.sql", table.table_name()),
        content,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_per_dialect() {
        for dialect in [SqlDialect::MySql, SqlDialect::Postgres, SqlDialect::Sqlite] {
            let scripts = scripts(dialect);
            assert_eq!(scripts.len(), 1);
            assert_eq!(
                scripts[0].name,
                format!("{dialect}/001_create_distributed_locks.sql")
            );
            assert!(scripts[0].content.contains("CREATE TABLE"));
            assert_eq!(scripts[0].content.matches("CREATE INDEX").count(), 2);
        }
    }

    #[test]
    fn test_custom_table_location() {
        let table = LockTableSchema::new(Some("ops".into()), "leases").unwrap();
        let scripts = scripts_for(SqlDialect::Postgres, &table);
        assert_eq!(scripts[0].name, "postgres/001_create_leases.sql");
        assert!(scripts[0].content.contains("\"ops\".\"leases\""));
    }
}
