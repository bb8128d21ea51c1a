//! Configuration for the sync engine.

use crate::location::DatabaseLocation;
use std::time::Duration;

/// Default name of the tombstone table.
pub const DEFAULT_TOMBSTONE_TABLE: &str = "MergeDelete";

/// Default name of the database entry inside the bootstrap snapshot.
pub const DEFAULT_SNAPSHOT_ENTRY: &str = "amperflow.db";

/// Default file name the bootstrap snapshot is downloaded to.
pub const DEFAULT_ARCHIVE_NAME: &str = "database.zip";

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Device ID, sent in migration, pull and bootstrap paths.
    pub device_id: String,
    /// Where the local database lives.
    pub location: DatabaseLocation,
    /// Table holding local deletions.
    pub tombstone_table: String,
    /// Timeout for ordinary requests; `None` (the default) leaves them
    /// unbounded, since a pull body can be large.
    pub request_timeout: Option<Duration>,
    /// Timeout for the bootstrap snapshot download.
    pub bootstrap_timeout: Duration,
    /// Name of the database file inside the snapshot archive.
    pub snapshot_entry: String,
    /// File name the snapshot archive is downloaded to.
    pub archive_name: String,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(device_id: impl Into<String>, location: DatabaseLocation) -> Self {
        Self {
            device_id: device_id.into(),
            location,
            tombstone_table: DEFAULT_TOMBSTONE_TABLE.to_string(),
            request_timeout: None,
            bootstrap_timeout: Duration::from_secs(15 * 60),
            snapshot_entry: DEFAULT_SNAPSHOT_ENTRY.to_string(),
            archive_name: DEFAULT_ARCHIVE_NAME.to_string(),
        }
    }

    /// Sets the tombstone table name.
    pub fn with_tombstone_table(mut self, table: impl Into<String>) -> Self {
        self.tombstone_table = table.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the bootstrap download timeout.
    pub fn with_bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout = timeout;
        self
    }

    /// Sets the snapshot entry name.
    pub fn with_snapshot_entry(mut self, entry: impl Into<String>) -> Self {
        self.snapshot_entry = entry.into();
        self
    }

    /// Sets the archive file name.
    pub fn with_archive_name(mut self, name: impl Into<String>) -> Self {
        self.archive_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::new("device-1", DatabaseLocation::new("/data", "main"));
        assert_eq!(config.tombstone_table, "MergeDelete");
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.bootstrap_timeout, Duration::from_secs(900));
        assert_eq!(config.snapshot_entry, "amperflow.db");
        assert_eq!(config.archive_name, "database.zip");
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("device-1", DatabaseLocation::new("/data", "main"))
            .with_tombstone_table("Deleted")
            .with_request_timeout(Duration::from_secs(5))
            .with_bootstrap_timeout(Duration::from_secs(60))
            .with_snapshot_entry("seed.db")
            .with_archive_name("seed.zip");

        assert_eq!(config.device_id, "device-1");
        assert_eq!(config.tombstone_table, "Deleted");
        assert_eq!(config.request_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.bootstrap_timeout, Duration::from_secs(60));
        assert_eq!(config.snapshot_entry, "seed.db");
        assert_eq!(config.archive_name, "seed.zip");
    }
}
