//! Migration listing and audit report types.

use crate::ids::MigrationId;
use serde::{Deserialize, Serialize};

/// Result string reported for a migration that executed successfully.
pub const MIGRATION_OK: &str = "OK";

/// A schema migration the server wants this device to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMigration {
    /// Server-assigned id; migrations run in ascending id order.
    pub id: MigrationId,
    /// SQL script to execute.
    pub query: String,
}

/// Outcome of a migration, posted to `migrations-result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Id of the migration.
    pub id: MigrationId,
    /// Wall-clock execution time in milliseconds.
    pub execution_time: u64,
    /// `"OK"` or the error message.
    pub result: String,
}

impl MigrationReport {
    /// Report for a migration that applied cleanly.
    pub fn success(id: MigrationId, execution_time: u64) -> Self {
        Self {
            id,
            execution_time,
            result: MIGRATION_OK.to_string(),
        }
    }

    /// Report for a migration that failed.
    pub fn failure(id: MigrationId, execution_time: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            execution_time,
            result: message.into(),
        }
    }

    /// Returns true when the migration applied cleanly.
    pub fn is_success(&self) -> bool {
        self.result == MIGRATION_OK
    }
}
