//! Query results.
//!
//! SQLite reports column names exactly as they were declared, while callers
//! usually know a column by a name whose case may differ (for example a
//! column list parsed from DDL). A [`ColumnMap`] resolves a set of wanted
//! names against a result set once; rows are then read by index only.

use crate::SqlValue;

/// The rows returned by a query, with their column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
}

impl ResultSet {
    /// Creates a result set from column names and rows.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }

    /// Returns the column names in result order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns all rows.
    pub fn rows(&self) -> &[Vec<SqlValue>] {
        &self.rows
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the query produced no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterates over the rows.
    pub fn iter(&self) -> impl Iterator<Item = &[SqlValue]> {
        self.rows.iter().map(Vec::as_slice)
    }

    /// Finds a column by name: exact match first, then ASCII case-insensitive.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
    }

    /// Resolves `keys` against this result set's columns.
    pub fn resolve<S: AsRef<str>>(&self, keys: &[S]) -> ColumnMap {
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
        let indexes = keys.iter().map(|k| self.column_index(k)).collect();
        ColumnMap { keys, indexes }
    }

    /// Returns the first column of the first row, if any.
    pub fn scalar(&self) -> Option<&SqlValue> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// A canonical key set resolved against one result set.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMap {
    keys: Vec<String>,
    indexes: Vec<Option<usize>>,
}

impl ColumnMap {
    /// Returns the canonical keys, in the order they were requested.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Returns the slot of a canonical key.
    pub fn slot(&self, key: &str) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }

    /// Returns the value for the key at `slot` in `row`.
    ///
    /// `None` means the key has no matching column in the result set.
    pub fn get<'r>(&self, row: &'r [SqlValue], slot: usize) -> Option<&'r SqlValue> {
        self.indexes
            .get(slot)
            .copied()
            .flatten()
            .and_then(|index| row.get(index))
    }

    /// Returns the value for a canonical key in `row`.
    pub fn value<'r>(&self, row: &'r [SqlValue], key: &str) -> Option<&'r SqlValue> {
        self.slot(key).and_then(|slot| self.get(row, slot))
    }

    /// Iterates over `(key, value)` pairs for `row`.
    pub fn entries<'a>(
        &'a self,
        row: &'a [SqlValue],
    ) -> impl Iterator<Item = (&'a str, Option<&'a SqlValue>)> + 'a {
        self.keys
            .iter()
            .enumerate()
            .map(move |(slot, key)| (key.as_str(), self.get(row, slot)))
    }

    /// Returns the keys that have no column in the result set.
    pub fn unresolved(&self) -> Vec<&str> {
        self.keys
            .iter()
            .zip(&self.indexes)
            .filter(|(_, index)| index.is_none())
            .map(|(key, _)| key.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResultSet {
        ResultSet::new(
            vec!["RowId".into(), "name".into(), "mergeupdate".into()],
            vec![
                vec![SqlValue::Null, SqlValue::Text("a".into()), SqlValue::Integer(0)],
                vec![
                    SqlValue::Text("r2".into()),
                    SqlValue::Text("b".into()),
                    SqlValue::Integer(3),
                ],
            ],
        )
    }

    #[test]
    fn column_index_prefers_exact_match() {
        let rs = ResultSet::new(vec!["name".into(), "Name".into()], vec![]);
        assert_eq!(rs.column_index("Name"), Some(1));
        assert_eq!(rs.column_index("NAME"), Some(0));
        assert_eq!(rs.column_index("missing"), None);
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let rs = sample();
        let map = rs.resolve(&["rowid", "Name", "MergeUpdate", "Extra"]);
        let row = &rs.rows()[1];
        assert_eq!(map.value(row, "rowid"), Some(&SqlValue::Text("r2".into())));
        assert_eq!(map.value(row, "Name"), Some(&SqlValue::Text("b".into())));
        assert_eq!(map.value(row, "MergeUpdate"), Some(&SqlValue::Integer(3)));
        assert_eq!(map.value(row, "Extra"), None);
        assert_eq!(map.unresolved(), vec!["Extra"]);
    }

    #[test]
    fn entries_follow_requested_order() {
        let rs = sample();
        let map = rs.resolve(&["name", "rowid"]);
        let keys: Vec<&str> = map.entries(&rs.rows()[0]).map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["name", "rowid"]);
    }

    #[test]
    fn scalar_of_empty_set() {
        assert!(ResultSet::default().scalar().is_none());
        assert_eq!(sample().scalar(), Some(&SqlValue::Null));
    }
}
