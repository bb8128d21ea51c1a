//! Statements and their parameters.

use crate::SqlValue;

/// Parameters bound to a [`Statement`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    /// The statement takes no parameters.
    #[default]
    None,
    /// Values bound in order to `?` / `?NNN` placeholders.
    Positional(Vec<SqlValue>),
    /// Values bound by name to `:name`, `@name` or `$name` placeholders.
    ///
    /// Names are matched case-insensitively. Anonymous `?` placeholders in the
    /// same statement take the pair at the same position.
    Named(Vec<(String, SqlValue)>),
}

impl Params {
    /// Returns true if no values are carried.
    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Positional(values) => values.is_empty(),
            Params::Named(pairs) => pairs.is_empty(),
        }
    }
}

/// A single SQL statement with its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text.
    pub sql: String,
    /// Bound parameters.
    pub params: Params,
}

impl Statement {
    /// Creates a statement without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Params::None,
        }
    }

    /// Creates a statement with positional parameters.
    pub fn with_params(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params: Params::Positional(params),
        }
    }

    /// Creates a statement with named parameters.
    pub fn with_named(sql: impl Into<String>, params: Vec<(String, SqlValue)>) -> Self {
        Self {
            sql: sql.into(),
            params: Params::Named(params),
        }
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement::new(sql)
    }
}

/// Quotes an identifier for use in generated SQL.
///
/// Embedded double quotes are doubled, so the result is always a single
/// identifier token.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
