use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// A uniqueness rule was violated (slug, session name, ...).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),
}

impl StoreError {
    /// Map SQLite unique-constraint failures onto [`StoreError::Conflict`].
    pub(crate) fn from_constraint(err: rusqlite::Error, what: &str) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(what.to_string())
            }
            other => StoreError::Sqlite(other),
        }
    }

    /// Map `QueryReturnedNoRows` onto [`StoreError::NotFound`].
    pub(crate) fn not_found(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            other => StoreError::Sqlite(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_failures_map_onto_store_errors() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT PRIMARY KEY); INSERT INTO t VALUES ('a');")
            .unwrap();

        let dup = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();
        assert!(matches!(StoreError::from_constraint(dup, "key taken"), StoreError::Conflict(m) if m == "key taken"));

        let missing = conn
            .query_row("SELECT k FROM t WHERE k = 'b'", [], |row| row.get::<_, String>(0))
            .unwrap_err();
        assert!(matches!(StoreError::not_found(missing), StoreError::NotFound));

        let bad_sql = conn.execute("SELECT nope FROM", []).unwrap_err();
        assert!(matches!(StoreError::not_found(bad_sql), StoreError::Sqlite(_)));
    }
}
