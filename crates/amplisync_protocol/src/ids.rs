//! Server-issued identifiers.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// An identifier assigned by the server.
///
/// The server sends ids either as JSON numbers or as strings. Both forms are
/// kept as received so they round-trip unchanged into URLs and reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerId {
    /// A numeric id.
    Number(i64),
    /// A textual id.
    Text(String),
}

/// Identifier of a pending migration.
pub type MigrationId = ServerId;

/// Cursor of a pull batch, acknowledged through `commit-sync/{syncId}`.
pub type SyncId = ServerId;

impl ServerId {
    /// Returns the numeric value, parsing textual ids when they are numbers.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            ServerId::Number(n) => Some(*n),
            ServerId::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerId::Number(n) => write!(f, "{n}"),
            ServerId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ServerId {
    fn from(n: i64) -> Self {
        ServerId::Number(n)
    }
}

impl From<&str> for ServerId {
    fn from(s: &str) -> Self {
        ServerId::Text(s.to_string())
    }
}

/// Numeric ids order numerically (whether sent as numbers or numeric
/// strings) and sort before non-numeric ids, which order lexically.
impl Ord for ServerId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| variant_rank(self).cmp(&variant_rank(other))),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.to_string().cmp(&other.to_string()),
        }
    }
}

impl PartialOrd for ServerId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn variant_rank(id: &ServerId) -> u8 {
    match id {
        ServerId::Number(_) => 0,
        ServerId::Text(_) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_numbers_and_strings() {
        let ids: Vec<ServerId> = serde_json::from_str(r#"[7, "12", "abc"]"#).unwrap();
        assert_eq!(
            ids,
            vec![ServerId::Number(7), ServerId::Text("12".into()), ServerId::Text("abc".into())]
        );
    }

    #[test]
    fn numeric_strings_order_numerically() {
        let mut ids = vec![
            ServerId::from("10"),
            ServerId::from(9),
            ServerId::from("b"),
            ServerId::from("2"),
            ServerId::from("a"),
        ];
        ids.sort();
        let shown: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(shown, vec!["2", "9", "10", "a", "b"]);
    }

    #[test]
    fn display_round_trips_into_paths() {
        assert_eq!(format!("commit-sync/{}", ServerId::from(42)), "commit-sync/42");
        assert_eq!(format!("commit-sync/{}", ServerId::from("s-1")), "commit-sync/s-1");
    }

    #[test]
    fn serializes_in_original_form() {
        assert_eq!(serde_json::to_string(&ServerId::from(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&ServerId::from("3")).unwrap(), "\"3\"");
    }
}
