//! Discovery of syncable tables and their columns.
//!
//! A table takes part in sync when its `CREATE TABLE` text mentions
//! `RowId` (SQLite's `LIKE` is case-insensitive). This is a plain substring
//! match: a table with a column such as `ParentRowId`, or with `RowId` in a
//! comment or default value, is picked up too. Callers rely on it, so the
//! rule stays as is.

use crate::error::SyncResult;
use amplisync_storage::{SqlExecutor, SqlValue, Statement};
use tracing::debug;

const SYNCABLE_TABLES_SQL: &str =
    "SELECT tbl_name, sql FROM sqlite_master WHERE type = 'table' AND sql LIKE '%RowId%'";

const TABLE_CONSTRAINT_KEYWORDS: [&str; 5] = ["CONSTRAINT", "PRIMARY", "FOREIGN", "UNIQUE", "CHECK"];

/// A table whose rows are synchronized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncableTable {
    /// Table name.
    pub name: String,
    /// Declared column names, in declaration order.
    pub columns: Vec<String>,
}

impl SyncableTable {
    /// Returns true if the table declares `column` (case-insensitively).
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

/// Lists syncable tables, skipping the tombstone table.
///
/// # Errors
///
/// Returns a storage error if the catalog cannot be read.
pub fn list_syncable_tables<E>(db: &E, tombstone_table: &str) -> SyncResult<Vec<SyncableTable>>
where
    E: SqlExecutor + ?Sized,
{
    let rows = db.query(&Statement::new(SYNCABLE_TABLES_SQL))?;
    let mut tables = Vec::new();

    for row in rows.iter() {
        let (SqlValue::Text(name), SqlValue::Text(sql)) = (&row[0], &row[1]) else {
            continue;
        };
        if name.is_empty() || name.eq_ignore_ascii_case(tombstone_table) {
            continue;
        }
        let columns = parse_columns(sql);
        debug!(table = %name, columns = columns.len(), "found syncable table");
        tables.push(SyncableTable {
            name: name.clone(),
            columns,
        });
    }

    Ok(tables)
}

/// Returns true if a table named `name` exists.
///
/// # Errors
///
/// Returns a storage error if the catalog cannot be read.
pub fn table_exists<E>(db: &E, name: &str) -> SyncResult<bool>
where
    E: SqlExecutor + ?Sized,
{
    let rows = db.query(&Statement::with_params(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ? COLLATE NOCASE",
        vec![SqlValue::Text(name.to_string())],
    ))?;
    Ok(!rows.is_empty())
}

/// Extracts column names from a `CREATE TABLE` statement.
///
/// The column-definition list is split on top-level commas; each clause
/// contributes its leading identifier with `[]`, `"` and backtick quoting
/// removed. Table-constraint clauses contribute nothing.
pub fn parse_columns(ddl: &str) -> Vec<String> {
    let Some(body) = definition_list(ddl) else {
        return Vec::new();
    };

    split_top_level(body)
        .into_iter()
        .filter_map(|clause| leading_identifier(clause.trim()))
        .collect()
}

/// Returns the text between the first `(` and its matching `)`.
fn definition_list(ddl: &str) -> Option<&str> {
    let start = ddl.find('(')?;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for (offset, ch) in ddl[start..].char_indices() {
        match quote {
            Some(close) if ch == close => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' | '`' => quote = Some(ch),
                '[' => quote = Some(']'),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&ddl[start + 1..start + offset]);
                    }
                }
                _ => {}
            },
        }
    }

    // Unbalanced: take everything after the opening parenthesis.
    Some(&ddl[start + 1..])
}

fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (offset, ch) in body.char_indices() {
        match quote {
            Some(close) if ch == close => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' | '`' => quote = Some(ch),
                '[' => quote = Some(']'),
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    parts.push(&body[start..offset]);
                    start = offset + 1;
                }
                _ => {}
            },
        }
    }
    parts.push(&body[start..]);
    parts
}

fn leading_identifier(clause: &str) -> Option<String> {
    let first = clause.chars().next()?;
    let close = match first {
        '"' => Some('"'),
        '`' => Some('`'),
        '[' => Some(']'),
        _ => None,
    };

    let name = match close {
        Some(close) => {
            let rest = &clause[first.len_utf8()..];
            let end = rest.find(close).unwrap_or(rest.len());
            rest[..end].to_string()
        }
        None => {
            let end = clause
                .find(|c: char| c.is_whitespace() || c == '(')
                .unwrap_or(clause.len());
            let word = &clause[..end];
            if TABLE_CONSTRAINT_KEYWORDS
                .iter()
                .any(|kw| word.eq_ignore_ascii_case(kw))
            {
                return None;
            }
            word.replace(['[', ']', '"', '`'], "")
        }
    };

    (!name.is_empty()).then_some(name)
}
