//! Scan and tables commands.
//!
//! Both read the local database directly and need no session.

use super::{CommandResult, Context, OutputFormat};
use amplisync_engine::{list_syncable_tables, scan as scan_changes, DEFAULT_TOMBSTONE_TABLE};
use amplisync_storage::SqliteStore;
use serde::Serialize;

/// Table listing entry.
#[derive(Debug, Serialize)]
pub struct TableInfo {
    /// Table name.
    pub name: String,
    /// Column names in declaration order.
    pub columns: Vec<String>,
}

fn open(context: &Context) -> CommandResult<SqliteStore> {
    let path = context.location().db_path();
    if !path.is_file() {
        return Err(format!("No database found at {}", path.display()).into());
    }
    Ok(SqliteStore::open(&path)?)
}

/// Prints pending local changes.
pub fn scan(context: &Context, format: OutputFormat) -> CommandResult {
    let _lock = context.lock()?;
    let store = open(context)?;
    let result = scan_changes(&store, DEFAULT_TOMBSTONE_TABLE)?;
    let changes = &result.changes;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(changes)?),
        OutputFormat::Text => {
            if changes.is_empty() {
                println!("No pending changes");
            }
            for table in &changes.changes {
                println!(
                    "{}: {} inserts, {} updates",
                    table.table,
                    table.inserts.len(),
                    table.updates.len()
                );
            }
            for delete in &changes.deletes {
                println!("{}: delete {}", delete.table, delete.rowid);
            }
        }
    }
    Ok(())
}

/// Prints syncable tables.
pub fn tables(context: &Context, format: OutputFormat) -> CommandResult {
    let _lock = context.lock()?;
    let store = open(context)?;
    let tables: Vec<TableInfo> = list_syncable_tables(&store, DEFAULT_TOMBSTONE_TABLE)?
        .into_iter()
        .map(|t| TableInfo {
            name: t.name,
            columns: t.columns,
        })
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tables)?),
        OutputFormat::Text => {
            for table in &tables {
                println!("{} ({})", table.name, table.columns.join(", "));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use amplisync_testkit::TestStore;
    use std::path::Path;

    fn context(dir: &Path) -> Context {
        Context::resolve(Some(dir.to_path_buf()), "main", "unknown", None, None).unwrap()
    }

    #[test]
    fn test_scan_and_tables_on_local_database() {
        let store = TestStore::widgets();
        store.insert_local("a");
        let ctx = context(store.dir());

        scan(&ctx, OutputFormat::Json).unwrap();
        tables(&ctx, OutputFormat::Text).unwrap();
        // Scanning is read-only.
        assert_eq!(store.count("Widgets"), 1);
    }

    #[test]
    fn test_missing_database_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        assert!(scan(&ctx, OutputFormat::Text).is_err());
        assert!(tables(&ctx, OutputFormat::Json).is_err());
    }
}
