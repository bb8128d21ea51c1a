//! The outgoing change set sent by a push.
//!
//! A push carries every locally captured change in one body:
//!
//! ```json
//! {
//!   "changes": [{ "table": "Widgets", "inserts": [{"name": "a"}], "updates": [] }],
//!   "deletes": [{ "table": "Widgets", "rowid": "r-1" }]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One captured row, keyed by column name in declaration order.
pub type RowPayload = serde_json::Map<String, Value>;

/// Every local change gathered by a single scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutgoingChangeSet {
    /// Per-table inserts and updates. Only tables with at least one of
    /// either appear here.
    pub changes: Vec<TableChanges>,
    /// Tombstones for rows deleted locally.
    pub deletes: Vec<TableDelete>,
}

impl OutgoingChangeSet {
    /// Creates an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.deletes.is_empty()
    }

    /// Total number of pending inserts across tables.
    pub fn insert_count(&self) -> usize {
        self.changes.iter().map(|c| c.inserts.len()).sum()
    }

    /// Total number of pending updates across tables.
    pub fn update_count(&self) -> usize {
        self.changes.iter().map(|c| c.updates.len()).sum()
    }

    /// Number of tombstones.
    pub fn delete_count(&self) -> usize {
        self.deletes.len()
    }

    /// Looks up the entry for a table.
    pub fn table(&self, name: &str) -> Option<&TableChanges> {
        self.changes.iter().find(|c| c.table == name)
    }
}

/// Pending inserts and updates of one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableChanges {
    /// Table name.
    pub table: String,
    /// Rows without a server identity.
    pub inserts: Vec<RowPayload>,
    /// Rows with a server identity and a positive dirty counter.
    pub updates: Vec<RowPayload>,
}

impl TableChanges {
    /// Creates an empty entry for a table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            inserts: Vec::new(),
            updates: Vec::new(),
        }
    }

    /// Returns true when the table has neither inserts nor updates.
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }
}

/// A locally deleted row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDelete {
    /// Table the row was deleted from.
    pub table: String,
    /// Server identity of the deleted row.
    pub rowid: String,
}

/// Encodes a column value for the push body.
///
/// Null becomes the string `"null"`, strings, numbers and booleans pass
/// through, and anything else is sent as its JSON text.
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::String("null".to_string()),
        Value::String(_) | Value::Number(_) | Value::Bool(_) => value.clone(),
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
    }
}
