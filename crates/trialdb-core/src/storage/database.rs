//! Database connection and schema management.

use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Row, ToSql, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::storage::error::{StorageError, StorageResult};

/// Named SQL parameters, as accepted by the store helpers.
pub type NamedParams<'p> = [(&'p str, &'p dyn ToSql)];

/// Database connection wrapper.
///
/// Manages the SQLite connection, schema initialization and the three store
/// primitives the trackers are written against: insert-returning-id,
/// single-row query, and execute-exactly-N-rows.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database at the specified path with default settings.
    ///
    /// # Errors
    /// * `StorageError::Connection` - If the database connection fails
    pub fn open(path: &str) -> StorageResult<Self> {
        Self::open_with_config(&DatabaseConfig { path: path.into(), ..DatabaseConfig::default() })
    }

    /// Opens the database described by `config`.
    ///
    /// Several `Database` values may point at the same file; SQLite serializes
    /// their writers, waiting up to `busy_timeout_ms` for the write lock.
    pub fn open_with_config(config: &DatabaseConfig) -> StorageResult<Self> {
        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Opens an in-memory database for testing.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Gets a reference to the underlying connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Initializes the database schema.
    ///
    /// Each table carries a uniqueness constraint on its natural key; that
    /// constraint, not any pre-check, is what finally rejects duplicates.
    fn init_schema(&self) -> StorageResult<()> {
        info!("Initializing database schema");

        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS trials (
                id INTEGER PRIMARY KEY,
                state TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS steps (
                trial_id INTEGER NOT NULL,
                id INTEGER NOT NULL,
                state TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                metrics TEXT,
                num_batches INTEGER NOT NULL,
                prior_batches_processed INTEGER NOT NULL,
                PRIMARY KEY (trial_id, id)
            );

            CREATE TABLE IF NOT EXISTS validations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trial_id INTEGER NOT NULL,
                total_batch INTEGER NOT NULL,
                state TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                metrics TEXT,
                UNIQUE (trial_id, total_batch)
            );

            CREATE TABLE IF NOT EXISTS checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trial_id INTEGER NOT NULL,
                total_batch INTEGER NOT NULL,
                state TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                uuid TEXT UNIQUE,
                resources TEXT,
                metadata TEXT,
                framework TEXT,
                format TEXT,
                version TEXT NOT NULL,
                UNIQUE (trial_id, total_batch)
            );

            CREATE INDEX IF NOT EXISTS idx_checkpoints_trial_state
                ON checkpoints(trial_id, state, total_batch);
            "#,
        )?;

        info!("Database schema initialized successfully");
        Ok(())
    }

    /// Runs `f` inside an `IMMEDIATE` transaction.
    ///
    /// The write lock is taken before `f` reads anything, so a read-modify-write
    /// in `f` cannot interleave with another writer on the same database file.
    /// The transaction commits if `f` succeeds and rolls back otherwise. The
    /// error from `f` is returned even if the rollback itself fails.
    pub fn immediate_transaction<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R, E>,
        E: From<StorageError>,
    {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;
        match f(&tx) {
            Ok(result) => {
                tx.commit().map_err(StorageError::from)?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    warn!(error = %rollback, "Rollback failed after transaction error");
                }
                Err(e)
            }
        }
    }
}

/// Executes an insert with named parameters and returns the generated row id.
pub fn insert_returning_id(
    conn: &Connection,
    sql: &str,
    params: &NamedParams<'_>,
) -> StorageResult<i64> {
    conn.execute(sql, params)?;
    Ok(conn.last_insert_rowid())
}

/// Queries a single row, failing with `StorageError::NotFound` when absent.
///
/// `what` names the row for the error message.
pub fn query_one<T, F>(
    conn: &Connection,
    sql: &str,
    params: &NamedParams<'_>,
    what: impl FnOnce() -> String,
    map: F,
) -> StorageResult<T>
where
    F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    match stmt.query_row(params, map).optional()? {
        Some(row) => Ok(row),
        None => Err(StorageError::NotFound(what())),
    }
}

/// Queries every matching row.
pub fn query_all<T, F>(
    conn: &Connection,
    sql: &str,
    params: &NamedParams<'_>,
    map: F,
) -> StorageResult<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, map)?.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Executes a statement that must affect exactly `expected` rows.
pub fn execute_exactly(
    conn: &Connection,
    sql: &str,
    params: &NamedParams<'_>,
    expected: usize,
) -> StorageResult<()> {
    let actual = conn.execute(sql, params)?;
    if actual != expected {
        return Err(StorageError::RowCount { expected, actual });
    }
    debug!(rows = actual, "Statement affected expected row count");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::named_params;

    fn table_names(db: &Database) -> Vec<String> {
        let mut stmt =
            db.conn().prepare("SELECT name FROM sqlite_master WHERE type='table'").unwrap();
        stmt.query_map([], |row| row.get(0)).unwrap().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_database_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        let tables = table_names(&db);

        assert!(tables.contains(&"trials".to_string()));
        assert!(tables.contains(&"steps".to_string()));
        assert!(tables.contains(&"validations".to_string()));
        assert!(tables.contains(&"checkpoints".to_string()));
    }

    #[test]
    fn test_database_open_file_persists() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("ledger.sqlite3");
        let path = path.to_str().unwrap();

        {
            let db = Database::open(path).unwrap();
            db.conn().execute("INSERT INTO trials (id, state) VALUES (1, 'ACTIVE')", []).unwrap();
        }

        let db = Database::open(path).unwrap();
        let count: i64 =
            db.conn().query_row("SELECT COUNT(*) FROM trials", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_insert_returning_id() {
        let db = Database::open_in_memory().unwrap();
        let id = insert_returning_id(
            db.conn(),
            "INSERT INTO validations (trial_id, total_batch, state, start_time) \
             VALUES (:trial_id, :total_batch, 'ACTIVE', '2024-01-01T00:00:00Z')",
            named_params! { ":trial_id": 1, ":total_batch": 10 },
        )
        .unwrap();
        assert_eq!(id, 1);
    }

    #[test]
    fn test_query_one_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = query_one(
            db.conn(),
            "SELECT state FROM trials WHERE id = :id",
            named_params! { ":id": 42 },
            || "trial 42".to_string(),
            |row| row.get::<_, String>(0),
        )
        .unwrap_err();
        match err {
            StorageError::NotFound(what) => assert_eq!(what, "trial 42"),
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_execute_exactly_reports_row_count() {
        let db = Database::open_in_memory().unwrap();
        let err = execute_exactly(
            db.conn(),
            "UPDATE trials SET state = 'PAUSED' WHERE id = :id",
            named_params! { ":id": 1 },
            1,
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::RowCount { expected: 1, actual: 0 }));
    }

    #[test]
    fn test_immediate_transaction_commit() {
        let db = Database::open_in_memory().unwrap();
        let result: StorageResult<()> = db.immediate_transaction(|tx| {
            tx.execute("INSERT INTO trials (id, state) VALUES (1, 'ACTIVE')", [])?;
            Ok(())
        });
        assert!(result.is_ok());

        let mut stmt = db.conn().prepare("SELECT id FROM trials WHERE id = 1").unwrap();
        assert!(stmt.exists([]).unwrap());
    }

    #[test]
    fn test_immediate_transaction_rollback() {
        let db = Database::open_in_memory().unwrap();
        let result: StorageResult<()> = db.immediate_transaction(|tx| {
            tx.execute("INSERT INTO trials (id, state) VALUES (1, 'ACTIVE')", [])?;
            Err(StorageError::InvalidData("Simulated error".to_string()))
        });
        assert!(result.is_err());

        let mut stmt = db.conn().prepare("SELECT id FROM trials WHERE id = 1").unwrap();
        assert!(!stmt.exists([]).unwrap());
    }

    #[test]
    fn test_immediate_transaction_keeps_error_when_rollback_fails() {
        let db = Database::open_in_memory().unwrap();
        let result: StorageResult<()> = db.immediate_transaction(|tx| {
            // Ending the transaction early makes the closing rollback fail.
            tx.execute_batch("ROLLBACK")?;
            Err(StorageError::InvalidData("Simulated error".to_string()))
        });
        match result {
            Err(StorageError::InvalidData(msg)) => assert_eq!(msg, "Simulated error"),
            other => panic!("Expected the closure's error, got {other:?}"),
        }
    }

    #[test]
    fn test_schema_is_idempotent() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("twice.sqlite3");
        let path = path.to_str().unwrap();
        let first = Database::open(path).unwrap();
        let second = Database::open(path).unwrap();
        assert_eq!(table_names(&first), table_names(&second));
    }
}
