// Mapping of SeaORM/sqlx errors onto WardenError

use sea_orm::{DbErr, RuntimeErr, SqlErr};
use warden_common::WardenError;

/// SQLSTATE reported by the database, if the error came from the server
pub fn sqlstate(err: &DbErr) -> Option<String> {
    let runtime = match err {
        DbErr::Exec(e) | DbErr::Query(e) | DbErr::Conn(e) => e,
        _ => return None,
    };
    match runtime {
        RuntimeErr::SqlxError(sea_orm::sqlx::Error::Database(db)) => {
            db.code().map(|code| code.into_owned())
        }
        _ => None,
    }
}

/// Whether the error is a primary-key or unique constraint violation
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Whether the server aborted the transaction to break a deadlock or a
/// serialization conflict
pub fn is_write_conflict(err: &DbErr) -> bool {
    matches!(sqlstate(err).as_deref(), Some("40001") | Some("40P01"))
}

/// Wrap a database error as a transient backend failure
pub fn backend(operation: &str, err: DbErr) -> WardenError {
    WardenError::backend(format!("{operation} failed"), err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_server_errors_have_no_sqlstate() {
        let err = DbErr::Custom("boom".to_string());
        assert_eq!(sqlstate(&err), None);
        assert!(!is_unique_violation(&err));
        assert!(!is_write_conflict(&err));
    }

    #[test]
    fn test_backend_error_is_retryable() {
        let err = backend("acquire", DbErr::Custom("connection reset".to_string()));
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "backend error: acquire failed");
    }
}
