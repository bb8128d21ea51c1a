//! Test fixtures and database helpers.
//!
//! The `Widgets` schema mirrors what a server-provisioned database looks
//! like: a `RowId` identity column filled in by the server, a `MergeUpdate`
//! dirty counter, a `MergeDelete` tombstone table and three triggers that
//! keep both up to date.

use amplisync_storage::{SqlExecutor, SqlValue, SqliteStore, Statement};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// File name of the fixture database inside its temporary directory.
pub const TEST_DB_FILE: &str = "main.db";

/// Tables of the fixture schema.
pub const WIDGETS_TABLES: &str = "
CREATE TABLE Widgets (
    RowId TEXT,
    name TEXT,
    MergeUpdate INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE MergeDelete (
    TableId TEXT NOT NULL,
    RowId TEXT NOT NULL
);
";

/// Creates the insert capture trigger.
pub const WIDGETS_INSERT_TRIGGER: &str = "CREATE TRIGGER Widgets_insert AFTER INSERT ON Widgets \
WHEN NEW.RowId IS NOT NULL BEGIN \
UPDATE Widgets SET MergeUpdate = MergeUpdate + 1 WHERE RowId = NEW.RowId; END";

/// Creates the update capture trigger.
pub const WIDGETS_UPDATE_TRIGGER: &str = "CREATE TRIGGER Widgets_update AFTER UPDATE OF name ON Widgets \
WHEN NEW.RowId IS NOT NULL BEGIN \
UPDATE Widgets SET MergeUpdate = MergeUpdate + 1 WHERE RowId = NEW.RowId; END";

/// Creates the delete capture trigger.
pub const WIDGETS_DELETE_TRIGGER: &str = "CREATE TRIGGER Widgets_delete AFTER DELETE ON Widgets \
WHEN OLD.RowId IS NOT NULL BEGIN \
INSERT INTO MergeDelete (TableId, RowId) VALUES ('Widgets', OLD.RowId); END";

/// Drop scripts matching the three capture triggers.
pub const WIDGETS_TRIGGER_DROPS: [&str; 3] = [
    "DROP TRIGGER IF EXISTS Widgets_insert",
    "DROP TRIGGER IF EXISTS Widgets_update",
    "DROP TRIGGER IF EXISTS Widgets_delete",
];

/// Names of the capture triggers, sorted.
pub const WIDGETS_TRIGGER_NAMES: [&str; 3] = ["Widgets_delete", "Widgets_insert", "Widgets_update"];

/// A temporary file database with automatic cleanup.
pub struct TestStore {
    /// The store.
    pub store: SqliteStore,
    path: PathBuf,
    _temp_dir: TempDir,
}

impl TestStore {
    /// Creates an empty database.
    pub fn empty() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join(TEST_DB_FILE);
        let store = SqliteStore::open(&path).expect("Failed to open test store");
        Self {
            store,
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Creates a database with the `Widgets` schema and capture triggers.
    pub fn widgets() -> Self {
        let test_store = Self::empty();
        install_widgets_schema(&test_store.store);
        test_store
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the database file.
    pub fn dir(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Inserts a row created on this device (no server identity yet).
    pub fn insert_local(&self, name: &str) {
        self.exec(
            "INSERT INTO Widgets (RowId, name) VALUES (NULL, ?)",
            vec![text(name)],
        );
    }

    /// Inserts a row known to the server, with a clear dirty counter.
    pub fn insert_synced(&self, row_id: &str, name: &str) {
        self.exec(
            "INSERT INTO Widgets (RowId, name) VALUES (?, ?)",
            vec![text(row_id), text(name)],
        );
        self.exec(
            "UPDATE Widgets SET MergeUpdate = 0 WHERE RowId = ?",
            vec![text(row_id)],
        );
    }

    /// Renames a row, which the update trigger records as a local edit.
    pub fn rename(&self, row_id: &str, name: &str) {
        self.exec(
            "UPDATE Widgets SET name = ? WHERE RowId = ?",
            vec![text(name), text(row_id)],
        );
    }

    /// Deletes a row, which the delete trigger records as a tombstone.
    pub fn delete(&self, row_id: &str) {
        self.exec("DELETE FROM Widgets WHERE RowId = ?", vec![text(row_id)]);
    }

    /// Returns the dirty counter of a row.
    pub fn merge_update(&self, row_id: &str) -> i64 {
        let rows = self
            .store
            .query(&Statement::with_params(
                "SELECT MergeUpdate FROM Widgets WHERE RowId = ?",
                vec![text(row_id)],
            ))
            .expect("Failed to read MergeUpdate");
        match rows.scalar() {
            Some(SqlValue::Integer(n)) => *n,
            other => panic!("unexpected MergeUpdate for {row_id}: {other:?}"),
        }
    }

    /// Returns the name of a row, if it exists.
    pub fn name_of(&self, row_id: &str) -> Option<String> {
        let rows = self
            .store
            .query(&Statement::with_params(
                "SELECT name FROM Widgets WHERE RowId = ?",
                vec![text(row_id)],
            ))
            .expect("Failed to read name");
        match rows.scalar() {
            Some(SqlValue::Text(name)) => Some(name.clone()),
            _ => None,
        }
    }

    /// Returns all tombstones as `(TableId, RowId)` pairs.
    pub fn tombstones(&self) -> Vec<(String, String)> {
        let rows = self
            .store
            .query(&Statement::new(
                "SELECT TableId, RowId FROM MergeDelete ORDER BY rowid",
            ))
            .expect("Failed to read tombstones");
        rows.iter()
            .map(|row| (text_of(&row[0]), text_of(&row[1])))
            .collect()
    }

    /// Returns the names of the `Widgets` triggers, sorted.
    pub fn trigger_names(&self) -> Vec<String> {
        let rows = self
            .store
            .query(&Statement::new(
                "SELECT name FROM sqlite_master WHERE type = 'trigger' AND tbl_name = 'Widgets' ORDER BY name",
            ))
            .expect("Failed to read triggers");
        rows.iter().map(|row| text_of(&row[0])).collect()
    }

    /// Returns the number of rows in a table.
    pub fn count(&self, table: &str) -> i64 {
        let rows = self
            .store
            .query(&Statement::new(format!("SELECT COUNT(*) FROM {table}")))
            .expect("Failed to count rows");
        match rows.scalar() {
            Some(SqlValue::Integer(n)) => *n,
            other => panic!("unexpected count for {table}: {other:?}"),
        }
    }

    /// Closes the connection and returns the directory and file path, so the
    /// file can be reopened or copied.
    pub fn into_file(self) -> (TempDir, PathBuf) {
        self.store.close().expect("Failed to close test store");
        (self._temp_dir, self.path)
    }

    fn exec(&self, sql: &str, params: Vec<SqlValue>) {
        self.store
            .execute(&Statement::with_params(sql, params))
            .expect("Failed to execute fixture statement");
    }
}

impl std::ops::Deref for TestStore {
    type Target = SqliteStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Creates the `Widgets` tables and capture triggers on `store`.
pub fn install_widgets_schema(store: &SqliteStore) {
    store
        .execute_script(WIDGETS_TABLES)
        .expect("Failed to create Widgets tables");
    for trigger in [
        WIDGETS_INSERT_TRIGGER,
        WIDGETS_UPDATE_TRIGGER,
        WIDGETS_DELETE_TRIGGER,
    ] {
        store
            .execute_script(trigger)
            .expect("Failed to create Widgets trigger");
    }
}

/// Runs a test with a temporary `Widgets` database.
///
/// # Example
///
/// ```rust,ignore
/// use amplisync_testkit::with_widgets_store;
///
/// #[test]
/// fn my_test() {
///     with_widgets_store(|store| {
///         store.insert_local("a");
///     });
/// }
/// ```
pub fn with_widgets_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    let store = TestStore::widgets();
    f(&store)
}

fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}

fn text_of(value: &SqlValue) -> String {
    match value {
        SqlValue::Text(s) => s.clone(),
        SqlValue::Integer(n) => n.to_string(),
        other => format!("{other:?}"),
    }
}
