//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use amplisync_protocol::{MigrationReport, OutgoingChangeSet, PendingMigration, SyncId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;

/// A sync transport handles network communication with the sync server.
///
/// One method per server endpoint. The transport owns the session, so
/// callers pass only per-call data. Every method maps a non-success response
/// to [`SyncError::Transport`].
pub trait SyncTransport: Send + Sync {
    /// Downloads the bootstrap snapshot archive to `dest`.
    fn download_snapshot(&self, device_id: &str, dest: &Path) -> SyncResult<()>;

    /// Sends the outgoing change set.
    fn push_changes(&self, changes: &OutgoingChangeSet) -> SyncResult<()>;

    /// Lists migrations pending for this login and device.
    fn list_migrations(&self, device_id: &str) -> SyncResult<Vec<PendingMigration>>;

    /// Reports the outcome of a migration.
    fn report_migration(&self, report: &MigrationReport) -> SyncResult<()>;

    /// Fetches the compressed change batch body for a table.
    fn fetch_batch(&self, table: &str, device_id: &str) -> SyncResult<Vec<u8>>;

    /// Acknowledges an applied batch.
    fn commit_batch(&self, sync_id: &SyncId) -> SyncResult<()>;
}

impl<T: SyncTransport + ?Sized> SyncTransport for std::sync::Arc<T> {
    fn download_snapshot(&self, device_id: &str, dest: &Path) -> SyncResult<()> {
        (**self).download_snapshot(device_id, dest)
    }

    fn push_changes(&self, changes: &OutgoingChangeSet) -> SyncResult<()> {
        (**self).push_changes(changes)
    }

    fn list_migrations(&self, device_id: &str) -> SyncResult<Vec<PendingMigration>> {
        (**self).list_migrations(device_id)
    }

    fn report_migration(&self, report: &MigrationReport) -> SyncResult<()> {
        (**self).report_migration(report)
    }

    fn fetch_batch(&self, table: &str, device_id: &str) -> SyncResult<Vec<u8>> {
        (**self).fetch_batch(table, device_id)
    }

    fn commit_batch(&self, sync_id: &SyncId) -> SyncResult<()> {
        (**self).commit_batch(sync_id)
    }
}

/// A call received by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    /// `prepopulate-db/{deviceId}`.
    DownloadSnapshot {
        /// Device id.
        device_id: String,
    },
    /// `receive-changes`.
    PushChanges(OutgoingChangeSet),
    /// `migrations/{login}/{deviceId}`.
    ListMigrations {
        /// Device id.
        device_id: String,
    },
    /// `migrations-result`.
    ReportMigration(MigrationReport),
    /// `sync-compressed/{table}/{deviceId}`.
    FetchBatch {
        /// Table name.
        table: String,
        /// Device id.
        device_id: String,
    },
    /// `commit-sync/{syncId}`.
    CommitBatch(SyncId),
}

/// Endpoints a [`MockTransport`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Snapshot download.
    DownloadSnapshot,
    /// Change push.
    PushChanges,
    /// Migration listing.
    ListMigrations,
    /// Migration report.
    ReportMigration,
    /// Batch fetch.
    FetchBatch,
    /// Batch commit.
    CommitBatch,
}

type CommitHook = Box<dyn Fn(&SyncId) + Send + Sync>;
type PushHook = Box<dyn Fn(&OutgoingChangeSet) + Send + Sync>;

/// A mock transport for testing.
///
/// Responses are configured up front; every call is recorded in order.
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<TransportCall>>,
    snapshot: Mutex<Option<Vec<u8>>>,
    migrations: Mutex<Vec<PendingMigration>>,
    batches: Mutex<HashMap<String, Vec<u8>>>,
    failures: Mutex<HashMap<Endpoint, u16>>,
    on_commit: Mutex<Option<CommitHook>>,
    on_push: Mutex<Option<PushHook>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the snapshot archive bytes.
    pub fn set_snapshot(&self, archive: Vec<u8>) {
        *self.snapshot.lock() = Some(archive);
    }

    /// Sets the pending migrations.
    pub fn set_migrations(&self, migrations: Vec<PendingMigration>) {
        *self.migrations.lock() = migrations;
    }

    /// Sets the compressed batch body for a table.
    pub fn set_batch_body(&self, table: &str, body: Vec<u8>) {
        self.batches.lock().insert(table.to_string(), body);
    }

    /// Makes an endpoint answer with `status`.
    pub fn fail(&self, endpoint: Endpoint, status: u16) {
        self.failures.lock().insert(endpoint, status);
    }

    /// Makes a failing endpoint succeed again.
    pub fn recover(&self, endpoint: Endpoint) {
        self.failures.lock().remove(&endpoint);
    }

    /// Runs `hook` whenever a commit is received, before it succeeds.
    pub fn on_commit(&self, hook: impl Fn(&SyncId) + Send + Sync + 'static) {
        *self.on_commit.lock() = Some(Box::new(hook));
    }

    /// Runs `hook` whenever a push is received, before it succeeds or fails.
    pub fn on_push(&self, hook: impl Fn(&OutgoingChangeSet) + Send + Sync + 'static) {
        *self.on_push.lock() = Some(Box::new(hook));
    }

    /// Returns every call received so far.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Returns the change sets received by `receive-changes`.
    pub fn pushed(&self) -> Vec<OutgoingChangeSet> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::PushChanges(changes) => Some(changes.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the migration reports received.
    pub fn reports(&self) -> Vec<MigrationReport> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::ReportMigration(report) => Some(report.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the committed batch ids.
    pub fn commits(&self) -> Vec<SyncId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::CommitBatch(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }

    fn check(&self, endpoint: Endpoint, label: &str) -> SyncResult<()> {
        match self.failures.lock().get(&endpoint) {
            Some(status) => Err(SyncError::status(label, *status)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("calls", &self.calls.lock().len())
            .finish_non_exhaustive()
    }
}

impl SyncTransport for MockTransport {
    fn download_snapshot(&self, device_id: &str, dest: &Path) -> SyncResult<()> {
        self.record(TransportCall::DownloadSnapshot {
            device_id: device_id.to_string(),
        });
        self.check(Endpoint::DownloadSnapshot, "downloadSnapshot")?;
        let archive = self
            .snapshot
            .lock()
            .clone()
            .ok_or_else(|| SyncError::status("downloadSnapshot", 404))?;
        std::fs::write(dest, archive)?;
        Ok(())
    }

    fn push_changes(&self, changes: &OutgoingChangeSet) -> SyncResult<()> {
        self.record(TransportCall::PushChanges(changes.clone()));
        if let Some(hook) = self.on_push.lock().as_ref() {
            hook(changes);
        }
        self.check(Endpoint::PushChanges, "pushChanges")
    }

    fn list_migrations(&self, device_id: &str) -> SyncResult<Vec<PendingMigration>> {
        self.record(TransportCall::ListMigrations {
            device_id: device_id.to_string(),
        });
        self.check(Endpoint::ListMigrations, "listMigrations")?;
        Ok(self.migrations.lock().clone())
    }

    fn report_migration(&self, report: &MigrationReport) -> SyncResult<()> {
        self.record(TransportCall::ReportMigration(report.clone()));
        self.check(Endpoint::ReportMigration, "reportMigration")
    }

    fn fetch_batch(&self, table: &str, device_id: &str) -> SyncResult<Vec<u8>> {
        self.record(TransportCall::FetchBatch {
            table: table.to_string(),
            device_id: device_id.to_string(),
        });
        self.check(Endpoint::FetchBatch, "fetchBatch")?;
        self.batches
            .lock()
            .get(table)
            .cloned()
            .ok_or_else(|| SyncError::status("fetchBatch", 404))
    }

    fn commit_batch(&self, sync_id: &SyncId) -> SyncResult<()> {
        self.record(TransportCall::CommitBatch(sync_id.clone()));
        if let Some(hook) = self.on_commit.lock().as_ref() {
            hook(sync_id);
        }
        self.check(Endpoint::CommitBatch, "commitSync")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amplisync_protocol::ServerId;

    #[test]
    fn mock_transport_records_calls() {
        let transport = MockTransport::new();
        transport.set_migrations(vec![PendingMigration {
            id: ServerId::from(1),
            query: "SELECT 1".into(),
        }]);

        let migrations = transport.list_migrations("dev").unwrap();
        assert_eq!(migrations.len(), 1);
        transport.commit_batch(&ServerId::from(9)).unwrap();

        assert_eq!(
            transport.calls(),
            vec![
                TransportCall::ListMigrations {
                    device_id: "dev".into()
                },
                TransportCall::CommitBatch(ServerId::from(9)),
            ]
        );
        assert_eq!(transport.commits(), vec![ServerId::from(9)]);
    }

    #[test]
    fn mock_transport_failure_and_recovery() {
        let transport = MockTransport::new();
        transport.fail(Endpoint::PushChanges, 500);

        let result = transport.push_changes(&OutgoingChangeSet::new());
        assert!(matches!(
            result,
            Err(SyncError::Transport {
                status: Some(500),
                ..
            })
        ));

        transport.recover(Endpoint::PushChanges);
        assert!(transport.push_changes(&OutgoingChangeSet::new()).is_ok());
        assert_eq!(transport.pushed().len(), 2);
    }

    #[test]
    fn missing_batch_is_not_found() {
        let transport = MockTransport::new();
        let result = transport.fetch_batch("Widgets", "dev");
        assert!(matches!(
            result,
            Err(SyncError::Transport {
                status: Some(404),
                ..
            })
        ));
    }
}
