//! SQLite-backed local store.

use crate::error::{StorageError, StorageResult};
use crate::rows::ResultSet;
use crate::statement::{Params, Statement};
use crate::SqlValue;
use parking_lot::Mutex;
use rusqlite::{Connection, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// How long a statement waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// The three storage primitives the sync engine is written against.
///
/// Implemented by [`SqliteStore`] (each call runs in autocommit mode) and by
/// [`StoreTransaction`] (calls join the enclosing transaction).
pub trait SqlExecutor {
    /// Runs a query and returns its rows.
    fn query(&self, statement: &Statement) -> StorageResult<ResultSet>;

    /// Executes a statement and returns the number of changed rows.
    fn execute(&self, statement: &Statement) -> StorageResult<usize>;

    /// Executes a script of one or more parameterless statements.
    fn execute_script(&self, sql: &str) -> StorageResult<()>;
}

/// A local SQLite database.
///
/// The store owns a single connection. It is created by [`SqliteStore::open`]
/// and torn down by [`SqliteStore::close`]; there is no process-wide handle.
///
/// # Thread Safety
///
/// The connection sits behind a mutex, so the store can be shared across
/// threads. Calls are serialized. A [`StoreTransaction`] holds the mutex for
/// its whole lifetime: do not call back into the store from inside
/// [`SqliteStore::transaction`], use the transaction handle instead.
///
/// # Example
///
/// ```rust
/// use amplisync_storage::{SqlExecutor, SqliteStore, Statement};
///
/// let store = SqliteStore::open_in_memory().unwrap();
/// store.execute_script("CREATE TABLE t (a TEXT)").unwrap();
/// store.execute(&Statement::new("INSERT INTO t VALUES ('x')")).unwrap();
/// let rows = store.query(&Statement::new("SELECT a FROM t")).unwrap();
/// assert_eq!(rows.len(), 1);
/// ```
#[derive(Debug)]
pub struct SqliteStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot open the file.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get(0)
        })?;
        debug!(path = %path.display(), journal_mode = %mode, "opened local store");

        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    /// Returns the database file path, or `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Runs `f` inside a single transaction.
    ///
    /// The transaction commits if `f` returns `Ok` and rolls back otherwise,
    /// so every write made through the handle (DDL included) is all-or-nothing.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or a storage error if the transaction
    /// cannot begin or commit.
    pub fn transaction<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&StoreTransaction<'_>) -> Result<R, E>,
        E: From<StorageError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;
        let scope = StoreTransaction { tx };

        match f(&scope) {
            Ok(value) => {
                scope.tx.commit().map_err(StorageError::from)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = scope.tx.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Runs a script that controls its own transactions (`BEGIN ... COMMIT`),
    /// outside any transaction opened by the store.
    ///
    /// A transaction the script leaves open, on failure or on success, is
    /// rolled back before returning so the connection is usable afterwards.
    ///
    /// # Errors
    ///
    /// Returns the failing statement's error, or
    /// [`StorageError::UnterminatedTransaction`] if the script succeeded
    /// without ending the transaction it began.
    pub fn execute_script_standalone(&self, sql: &str) -> StorageResult<()> {
        let conn = self.conn.lock();
        let result = conn.execute_batch(sql);
        if conn.is_autocommit() {
            return result.map_err(StorageError::from);
        }

        if let Err(rollback) = conn.execute_batch("ROLLBACK") {
            warn!(error = %rollback, "rollback of script transaction failed");
        }
        result?;
        Err(StorageError::UnterminatedTransaction)
    }

    /// Executes `statements` atomically: all of them or none.
    ///
    /// # Errors
    ///
    /// Returns the first failing statement's error; nothing is committed.
    pub fn batch(&self, statements: &[Statement]) -> StorageResult<()> {
        self.transaction(|tx| {
            for statement in statements {
                tx.execute(statement)?;
            }
            Ok(())
        })
    }

    /// Closes the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite refuses to close (for example because of
    /// unfinalized statements).
    pub fn close(self) -> StorageResult<()> {
        let conn = self.conn.into_inner();
        conn.close().map_err(|(_, err)| StorageError::Sqlite(err))
    }
}

impl SqlExecutor for SqliteStore {
    fn query(&self, statement: &Statement) -> StorageResult<ResultSet> {
        run_query(&self.conn.lock(), statement)
    }

    fn execute(&self, statement: &Statement) -> StorageResult<usize> {
        run_execute(&self.conn.lock(), statement)
    }

    fn execute_script(&self, sql: &str) -> StorageResult<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }
}

/// A handle to an open transaction, passed to [`SqliteStore::transaction`].
pub struct StoreTransaction<'conn> {
    tx: rusqlite::Transaction<'conn>,
}

impl SqlExecutor for StoreTransaction<'_> {
    fn query(&self, statement: &Statement) -> StorageResult<ResultSet> {
        run_query(&self.tx, statement)
    }

    fn execute(&self, statement: &Statement) -> StorageResult<usize> {
        run_execute(&self.tx, statement)
    }

    fn execute_script(&self, sql: &str) -> StorageResult<()> {
        self.tx.execute_batch(sql)?;
        Ok(())
    }
}

fn run_query(conn: &Connection, statement: &Statement) -> StorageResult<ResultSet> {
    let mut stmt = conn.prepare(&statement.sql)?;
    bind(&mut stmt, statement)?;

    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();
    let mut rows = Vec::new();
    let mut cursor = stmt.raw_query();
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for index in 0..width {
            values.push(row.get::<_, SqlValue>(index)?);
        }
        rows.push(values);
    }

    Ok(ResultSet::new(columns, rows))
}

fn run_execute(conn: &Connection, statement: &Statement) -> StorageResult<usize> {
    let mut stmt = conn.prepare(&statement.sql)?;
    bind(&mut stmt, statement)?;
    Ok(stmt.raw_execute()?)
}

fn bind(stmt: &mut rusqlite::Statement<'_>, statement: &Statement) -> StorageResult<()> {
    let expected = stmt.parameter_count();

    match &statement.params {
        Params::None => {}
        Params::Positional(values) => {
            if values.len() != expected {
                return Err(StorageError::ParameterCount {
                    expected,
                    actual: values.len(),
                    sql: statement.sql.clone(),
                });
            }
            for (offset, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(offset + 1, value)?;
            }
        }
        Params::Named(pairs) => {
            for index in 1..=expected {
                let name = stmt.parameter_name(index).map(str::to_string);
                let value = match name.as_deref() {
                    Some(name) if name.starts_with('?') => name[1..]
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| pairs.get(n.saturating_sub(1)))
                        .map(|(_, v)| v),
                    Some(name) => {
                        let key = name.trim_start_matches([':', '@', '$']);
                        pairs
                            .iter()
                            .find(|(k, _)| k == key)
                            .or_else(|| pairs.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)))
                            .map(|(_, v)| v)
                    }
                    None => pairs.get(index - 1).map(|(_, v)| v),
                };
                let value = value.ok_or_else(|| StorageError::MissingParameter {
                    name: name.unwrap_or_else(|| format!("?{index}")),
                    sql: statement.sql.clone(),
                })?;
                stmt.raw_bind_parameter(index, value)?;
            }
        }
    }

    Ok(())
}
