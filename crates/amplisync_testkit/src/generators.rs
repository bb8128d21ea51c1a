//! Property-based test generators using proptest.

use proptest::prelude::*;
use serde_json::Value;

/// Strategy for generating plain SQL identifiers.
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9_]{0,15}")
        .expect("Invalid regex")
        .prop_filter("identifier must not be a constraint keyword", |s| {
            !matches!(
                s.to_ascii_uppercase().as_str(),
                "PRIMARY" | "FOREIGN" | "UNIQUE" | "CHECK" | "CONSTRAINT"
            )
        })
}

/// Strategy for generating a column type with optional constraints.
pub fn column_type_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("TEXT".to_string()),
        Just("INTEGER NOT NULL DEFAULT 0".to_string()),
        Just("REAL".to_string()),
        Just("NUMERIC(10, 2)".to_string()),
        Just("TEXT DEFAULT 'a,b'".to_string()),
        Just(String::new()),
    ]
}

/// Wraps an identifier in one of the quoting styles SQLite accepts.
pub fn decorate(name: &str, style: u8) -> String {
    match style % 4 {
        0 => name.to_string(),
        1 => format!("[{name}]"),
        2 => format!("\"{name}\""),
        _ => format!("`{name}`"),
    }
}

/// Strategy for generating a `CREATE TABLE` statement together with the
/// column names it declares.
///
/// Generated tables always have a `RowId` column and may end with a table
/// constraint clause.
pub fn create_table_strategy() -> impl Strategy<Value = (String, Vec<String>)> {
    (
        identifier_strategy(),
        prop::collection::vec((identifier_strategy(), column_type_strategy(), any::<u8>()), 0..6),
        any::<bool>(),
    )
        .prop_map(|(table, extra, with_constraint)| {
            let mut names = vec!["RowId".to_string()];
            let mut clauses = vec!["RowId TEXT".to_string()];
            for (name, ty, style) in extra {
                if names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                    continue;
                }
                clauses.push(format!("{} {ty}", decorate(&name, style)).trim_end().to_string());
                names.push(name);
            }
            if with_constraint {
                clauses.push("UNIQUE (RowId)".to_string());
            }
            let ddl = format!("CREATE TABLE {table} ({})", clauses.join(", "));
            (ddl, names)
        })
}

/// Strategy for generating JSON values of any shape.
pub fn json_value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-z ]{0,8}".prop_map(Value::from),
    ];
    leaf.prop_recursive(2, 8, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec(("[a-z]{1,4}", inner), 0..4)
                .prop_map(|pairs| Value::Object(pairs.into_iter().collect())),
        ]
    })
}
