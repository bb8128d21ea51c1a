//! # AmpliSync Storage
//!
//! SQLite storage adapter for the AmpliSync engine.
//!
//! The sync engine talks to the local database through three primitives:
//!
//! - run a query and get rows ([`SqlExecutor::query`])
//! - execute a statement ([`SqlExecutor::execute`])
//! - execute a batch of statements atomically ([`SqliteStore::batch`])
//!
//! plus an explicit transaction scope ([`SqliteStore::transaction`]) used
//! where schema changes and data writes must commit or roll back together.
//!
//! ## Design Principles
//!
//! - The store is an owned value; callers pass it by reference
//! - Rows are positional; column-name case is resolved once per result set
//!   through a [`ColumnMap`]
//! - Values use SQLite's own dynamic type ([`SqlValue`])
//!
//! ## Example
//!
//! ```rust
//! use amplisync_storage::{SqlExecutor, SqliteStore, Statement, SqlValue};
//!
//! let store = SqliteStore::open_in_memory().unwrap();
//! store.execute_script("CREATE TABLE notes (body TEXT)").unwrap();
//! store
//!     .batch(&[
//!         Statement::with_params("INSERT INTO notes VALUES (?)", vec![SqlValue::Text("a".into())]),
//!         Statement::with_params("INSERT INTO notes VALUES (?)", vec![SqlValue::Text("b".into())]),
//!     ])
//!     .unwrap();
//! assert_eq!(store.query(&Statement::new("SELECT * FROM notes")).unwrap().len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod rows;
mod statement;
mod store;

pub use error::{StorageError, StorageResult};
pub use rows::{ColumnMap, ResultSet};
pub use statement::{quote_identifier, Params, Statement};
pub use store::{SqlExecutor, SqliteStore, StoreTransaction};

/// A dynamically typed SQLite value.
pub use rusqlite::types::Value as SqlValue;
