//! Change capture: turns dirty markers into an outgoing change set.
//!
//! Local writes are tracked by the database itself:
//!
//! - a row with `RowId IS NULL` was created on this device and has no
//!   server identity yet (a pending insert);
//! - a row with a `RowId` and `MergeUpdate > 0` was edited locally (a
//!   pending update, whose counter value is its version token);
//! - a row in the tombstone table records a local delete.
//!
//! [`scan`] reads all three without writing anything. Alongside the change
//! set it returns the [`AckAction`]s to run once the server has accepted
//! the push.

use crate::error::SyncResult;
use crate::schema::{list_syncable_tables, table_exists, SyncableTable};
use amplisync_protocol::{
    encode_value, OutgoingChangeSet, RowPayload, TableChanges, TableDelete,
};
use amplisync_storage::{quote_identifier, ColumnMap, SqlExecutor, SqlValue, Statement};
use serde_json::Value;
use tracing::{debug, warn};

const ROW_ID: &str = "RowId";
const MERGE_UPDATE: &str = "MergeUpdate";
const TABLE_ID: &str = "TableId";

/// Output key used for the identity column in update payloads.
const ROW_ID_KEY: &str = "rowid";

/// Local write to perform after the server accepted a push.
#[derive(Debug, Clone, PartialEq)]
pub enum AckAction {
    /// Clears the dirty counter of an updated row, but only if it still
    /// holds the version that was sent.
    ClearDirty {
        /// Table name.
        table: String,
        /// Server identity of the row.
        row_id: SqlValue,
        /// `MergeUpdate` value at scan time.
        version: SqlValue,
    },
    /// Removes a tombstone that was sent.
    DropTombstone {
        /// Tombstone table name.
        tombstone_table: String,
        /// Table the row was deleted from.
        table_id: SqlValue,
        /// Server identity of the deleted row.
        row_id: SqlValue,
    },
}

impl AckAction {
    /// The statement performing this action.
    pub fn to_statement(&self) -> Statement {
        match self {
            AckAction::ClearDirty {
                table,
                row_id,
                version,
            } => Statement::with_params(
                format!(
                    "UPDATE {} SET MergeUpdate = 0 WHERE rowid = ? AND MergeUpdate = ?",
                    quote_identifier(table)
                ),
                vec![row_id.clone(), version.clone()],
            ),
            AckAction::DropTombstone {
                tombstone_table,
                table_id,
                row_id,
            } => Statement::with_params(
                format!(
                    "DELETE FROM {} WHERE TableId = ? AND RowId = ?",
                    quote_identifier(tombstone_table)
                ),
                vec![table_id.clone(), row_id.clone()],
            ),
        }
    }
}

/// Everything a push needs: what to send, and what to do once it is
/// accepted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanResult {
    /// Body of the push.
    pub changes: OutgoingChangeSet,
    /// Local writes to run after a successful push.
    pub acks: Vec<AckAction>,
}

/// Collects pending inserts, updates and deletes.
///
/// Insert payloads carry the declared columns except `RowId` and
/// `MergeUpdate`. Update payloads also carry the identity, under the key
/// `rowid`. Column names are matched case-insensitively against each result
/// set.
///
/// # Errors
///
/// Returns a storage error if a query fails.
pub fn scan<E>(db: &E, tombstone_table: &str) -> SyncResult<ScanResult>
where
    E: SqlExecutor + ?Sized,
{
    let mut result = ScanResult::default();

    for table in list_syncable_tables(db, tombstone_table)? {
        if table.columns.is_empty() {
            continue;
        }
        let changes = scan_table(db, &table, &mut result.acks)?;
        if !changes.is_empty() {
            debug!(
                table = %table.name,
                inserts = changes.inserts.len(),
                updates = changes.updates.len(),
                "captured changes"
            );
            result.changes.changes.push(changes);
        }
    }

    if table_exists(db, tombstone_table)? {
        scan_tombstones(db, tombstone_table, &mut result)?;
    }

    Ok(result)
}

fn scan_table<E>(db: &E, table: &SyncableTable, acks: &mut Vec<AckAction>) -> SyncResult<TableChanges>
where
    E: SqlExecutor + ?Sized,
{
    let quoted = quote_identifier(&table.name);
    let mut changes = TableChanges::new(&table.name);

    let inserts = db.query(&Statement::new(format!(
        "SELECT * FROM {quoted} WHERE RowId IS NULL"
    )))?;
    let insert_columns: Vec<&String> = table
        .columns
        .iter()
        .filter(|c| !c.eq_ignore_ascii_case(MERGE_UPDATE) && !c.eq_ignore_ascii_case(ROW_ID))
        .collect();
    let map = inserts.resolve(&insert_columns);
    warn_unresolved(&table.name, &map);
    for row in inserts.iter() {
        changes.inserts.push(payload(&map, row));
    }

    if !table.has_column(MERGE_UPDATE) {
        debug!(table = %table.name, "no MergeUpdate column, skipping updates");
        return Ok(changes);
    }

    let updates = db.query(&Statement::new(format!(
        "SELECT * FROM {quoted} WHERE MergeUpdate > 0 AND RowId IS NOT NULL"
    )))?;
    let update_columns: Vec<&String> = table
        .columns
        .iter()
        .filter(|c| !c.eq_ignore_ascii_case(MERGE_UPDATE))
        .collect();
    let map = updates.resolve(&update_columns);
    let markers = updates.resolve(&[ROW_ID, MERGE_UPDATE]);
    for row in updates.iter() {
        changes.updates.push(payload(&map, row));
        acks.push(AckAction::ClearDirty {
            table: table.name.clone(),
            row_id: markers.value(row, ROW_ID).cloned().unwrap_or(SqlValue::Null),
            version: markers.value(row, MERGE_UPDATE).cloned().unwrap_or(SqlValue::Null),
        });
    }

    Ok(changes)
}

fn scan_tombstones<E>(db: &E, tombstone_table: &str, result: &mut ScanResult) -> SyncResult<()>
where
    E: SqlExecutor + ?Sized,
{
    let rows = db.query(&Statement::new(format!(
        "SELECT * FROM {}",
        quote_identifier(tombstone_table)
    )))?;
    let map = rows.resolve(&[TABLE_ID, ROW_ID]);
    warn_unresolved(tombstone_table, &map);

    for row in rows.iter() {
        let table_id = map.value(row, TABLE_ID).cloned().unwrap_or(SqlValue::Null);
        let row_id = map.value(row, ROW_ID).cloned().unwrap_or(SqlValue::Null);
        result.changes.deletes.push(TableDelete {
            table: value_text(&table_id),
            rowid: value_text(&row_id),
        });
        result.acks.push(AckAction::DropTombstone {
            tombstone_table: tombstone_table.to_string(),
            table_id,
            row_id,
        });
    }

    if !rows.is_empty() {
        debug!(count = rows.len(), "captured deletes");
    }
    Ok(())
}

/// Logs declared columns missing from a result set; they are sent as `"null"`.
fn warn_unresolved(table: &str, map: &ColumnMap) {
    let missing = map.unresolved();
    if !missing.is_empty() {
        warn!(table = %table, columns = ?missing, "declared columns not found in table");
    }
}

fn payload(map: &ColumnMap, row: &[SqlValue]) -> RowPayload {
    map.entries(row)
        .map(|(key, value)| {
            let key = if key.eq_ignore_ascii_case(ROW_ID) {
                ROW_ID_KEY.to_string()
            } else {
                key.to_string()
            };
            let json = value.map(sql_to_json).unwrap_or(Value::Null);
            (key, encode_value(&json))
        })
        .collect()
}

/// Converts a column value to JSON.
pub(crate) fn sql_to_json(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(n) => Value::from(*n),
        SqlValue::Real(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn value_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "null".to_string(),
        SqlValue::Integer(n) => n.to_string(),
        SqlValue::Real(f) => f.to_string(),
        SqlValue::Text(s) => s.clone(),
        SqlValue::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amplisync_storage::SqliteStore;
    use amplisync_testkit::TestStore;
    use serde_json::json;

    fn apply(store: &SqliteStore, acks: &[AckAction]) {
        let statements: Vec<Statement> = acks.iter().map(AckAction::to_statement).collect();
        store.batch(&statements).unwrap();
    }

    #[test]
    fn single_local_insert() {
        let store = TestStore::widgets();
        store.insert_local("a");

        let result = scan(&*store, "MergeDelete").unwrap();
        assert_eq!(
            serde_json::to_value(&result.changes).unwrap(),
            json!({
                "changes": [{"table": "Widgets", "inserts": [{"name": "a"}], "updates": []}],
                "deletes": []
            })
        );
        assert!(result.acks.is_empty());
    }

    #[test]
    fn identity_less_rows_are_never_updates() {
        let store = TestStore::widgets();
        store.insert_local("a");
        store
            .execute(&Statement::new("UPDATE Widgets SET MergeUpdate = 3"))
            .unwrap();

        let result = scan(&*store, "MergeDelete").unwrap();
        let widgets = result.changes.table("Widgets").unwrap();
        assert_eq!(widgets.inserts.len(), 1);
        assert!(widgets.updates.is_empty());
    }

    #[test]
    fn dirty_row_becomes_update_with_rowid_key() {
        let store = TestStore::widgets();
        store.insert_synced("r-1", "a");
        store.rename("r-1", "b");

        let result = scan(&*store, "MergeDelete").unwrap();
        let widgets = result.changes.table("Widgets").unwrap();
        let expected = json!({"rowid": "r-1", "name": "b"});
        assert_eq!(widgets.updates, vec![expected.as_object().cloned().unwrap()]);
        assert_eq!(
            result.acks,
            vec![AckAction::ClearDirty {
                table: "Widgets".into(),
                row_id: SqlValue::Text("r-1".into()),
                version: SqlValue::Integer(1),
            }]
        );
    }

    #[test]
    fn clean_tables_are_left_out() {
        let store = TestStore::widgets();
        store.insert_synced("r-1", "a");
        let result = scan(&*store, "MergeDelete").unwrap();
        assert!(result.changes.is_empty());
    }

    #[test]
    fn nulls_are_sent_as_text() {
        let store = TestStore::widgets();
        store
            .execute(&Statement::new("INSERT INTO Widgets (RowId, name) VALUES (NULL, NULL)"))
            .unwrap();
        let result = scan(&*store, "MergeDelete").unwrap();
        assert_eq!(
            result.changes.changes[0].inserts[0].get("name"),
            Some(&json!("null"))
        );
    }

    #[test]
    fn tombstones_become_deletes() {
        let store = TestStore::widgets();
        store.insert_synced("r-1", "a");
        store.delete("r-1");

        let result = scan(&*store, "MergeDelete").unwrap();
        assert_eq!(
            result.changes.deletes,
            vec![TableDelete {
                table: "Widgets".into(),
                rowid: "r-1".into()
            }]
        );
        apply(&store, &result.acks);
        assert!(store.tombstones().is_empty());
    }

    #[test]
    fn scan_does_not_write() {
        let store = TestStore::widgets();
        store.insert_local("a");
        store.insert_synced("r-1", "a");
        store.rename("r-1", "b");
        store.insert_synced("r-2", "c");
        store.delete("r-2");

        let first = scan(&*store, "MergeDelete").unwrap();
        let second = scan(&*store, "MergeDelete").unwrap();
        assert_eq!(first, second);
        assert_eq!(store.merge_update("r-1"), 1);
        assert_eq!(store.tombstones().len(), 1);
    }

    #[test]
    fn compare_and_clear_loses_to_concurrent_edit() {
        let store = TestStore::widgets();
        store.insert_synced("r-1", "a");
        store.rename("r-1", "b");

        let result = scan(&*store, "MergeDelete").unwrap();
        store.rename("r-1", "c");
        apply(&store, &result.acks);

        assert_eq!(store.merge_update("r-1"), 2);
        let next = scan(&*store, "MergeDelete").unwrap();
        assert_eq!(next.changes.update_count(), 1);
    }

    #[test]
    fn compare_and_clear_wins_without_concurrent_edit() {
        let store = TestStore::widgets();
        store.insert_synced("r-1", "a");
        store.rename("r-1", "b");

        let result = scan(&*store, "MergeDelete").unwrap();
        apply(&store, &result.acks);
        assert_eq!(store.merge_update("r-1"), 0);
    }

    #[test]
    fn column_case_is_resolved_per_result_set() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_script(
                "CREATE TABLE Items (ROWID TEXT, Label TEXT, mergeupdate INTEGER DEFAULT 0);
                 INSERT INTO Items (ROWID, Label, mergeupdate) VALUES ('i-1', 'x', 2);",
            )
            .unwrap();

        let result = scan(&store, "MergeDelete").unwrap();
        let items = result.changes.table("Items").unwrap();
        let row = &items.updates[0];
        assert_eq!(row.get("rowid"), Some(&json!("i-1")));
        assert_eq!(row.get("Label"), Some(&json!("x")));
        assert!(row.get("mergeupdate").is_none());
    }

    #[test]
    fn declared_column_without_data_is_sent_as_null() {
        let store = TestStore::widgets();
        store.insert_local("a");
        store.insert_synced("w-1", "b");
        store
            .execute(&Statement::new("UPDATE Widgets SET MergeUpdate = 2 WHERE RowId = 'w-1'"))
            .unwrap();
        let table = SyncableTable {
            name: "Widgets".into(),
            columns: vec!["RowId".into(), "name".into(), "colour".into(), "MergeUpdate".into()],
        };

        let mut acks = Vec::new();
        let changes = scan_table(&*store, &table, &mut acks).unwrap();
        assert_eq!(changes.inserts[0].get("name"), Some(&json!("a")));
        assert_eq!(changes.inserts[0].get("colour"), Some(&json!("null")));
        assert_eq!(changes.updates[0].get("colour"), Some(&json!("null")));
        assert_eq!(
            acks,
            vec![AckAction::ClearDirty {
                table: "Widgets".into(),
                row_id: SqlValue::Text("w-1".into()),
                version: SqlValue::Integer(2),
            }]
        );
    }

    #[test]
    fn missing_tombstone_table_is_tolerated() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_script("CREATE TABLE T (RowId TEXT, v TEXT, MergeUpdate INTEGER DEFAULT 0)")
            .unwrap();
        let result = scan(&store, "MergeDelete").unwrap();
        assert!(result.changes.is_empty());
    }

    #[test]
    fn real_and_blob_values_are_converted() {
        assert_eq!(sql_to_json(&SqlValue::Real(1.5)), json!(1.5));
        assert_eq!(sql_to_json(&SqlValue::Real(f64::NAN)), json!("NaN"));
        assert_eq!(sql_to_json(&SqlValue::Blob(b"hi".to_vec())), json!("hi"));
    }
}
