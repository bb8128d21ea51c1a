//! Push: send captured changes, then acknowledge them locally.

use crate::capture::scan;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use amplisync_storage::{SqlExecutor, SqliteStore};
use tracing::{debug, info};

/// What a push sent and acknowledged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushSummary {
    /// Pending inserts sent.
    pub inserts: usize,
    /// Pending updates sent.
    pub updates: usize,
    /// Tombstones sent.
    pub deletes: usize,
    /// Dirty counters cleared after the push.
    pub cleared: usize,
    /// Updates whose counter moved on after the scan and stay dirty.
    pub still_dirty: usize,
}

impl PushSummary {
    /// Rows sent, of any kind.
    pub fn total(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }
}

/// Scans local changes, sends them, and on success runs the acknowledgement
/// writes in one transaction.
///
/// The change set is sent even when empty. If the transport fails nothing is
/// written locally, so the next scan sees the same changes.
///
/// # Errors
///
/// Returns the transport error, or a storage error from the scan or the
/// acknowledgement transaction.
pub fn push<T>(store: &SqliteStore, transport: &T, tombstone_table: &str) -> SyncResult<PushSummary>
where
    T: SyncTransport + ?Sized,
{
    let scanned = scan(store, tombstone_table)?;
    let mut summary = PushSummary {
        inserts: scanned.changes.insert_count(),
        updates: scanned.changes.update_count(),
        deletes: scanned.changes.delete_count(),
        ..PushSummary::default()
    };
    debug!(
        inserts = summary.inserts,
        updates = summary.updates,
        deletes = summary.deletes,
        "pushing changes"
    );

    transport.push_changes(&scanned.changes)?;

    let cleared = store.transaction(|tx| {
        let mut cleared = 0;
        for ack in &scanned.acks {
            let changed = tx.execute(&ack.to_statement())?;
            if matches!(ack, crate::capture::AckAction::ClearDirty { .. }) {
                cleared += changed;
            }
        }
        Ok::<_, SyncError>(cleared)
    })?;
    summary.cleared = cleared;
    summary.still_dirty = summary.updates.saturating_sub(cleared);

    info!(
        sent = summary.total(),
        still_dirty = summary.still_dirty,
        "push complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Endpoint, MockTransport};
    use amplisync_testkit::TestStore;

    #[test]
    fn empty_push_still_posts() {
        let store = TestStore::widgets();
        let transport = MockTransport::new();

        let summary = push(&store, &transport, "MergeDelete").unwrap();
        assert_eq!(summary.total(), 0);
        assert_eq!(transport.pushed().len(), 1);
        assert!(transport.pushed()[0].is_empty());
    }

    #[test]
    fn success_clears_markers_and_tombstones() {
        let store = TestStore::widgets();
        store.insert_synced("r-1", "a");
        store.rename("r-1", "b");
        store.insert_synced("r-2", "c");
        store.delete("r-2");
        store.insert_local("new");
        let transport = MockTransport::new();

        let summary = push(&store, &transport, "MergeDelete").unwrap();
        assert_eq!(summary.inserts, 1);
        assert_eq!(summary.updates, 1);
        assert_eq!(summary.deletes, 1);
        assert_eq!(summary.cleared, 1);
        assert_eq!(store.merge_update("r-1"), 0);
        assert!(store.tombstones().is_empty());
    }

    #[test]
    fn failure_leaves_local_state_untouched() {
        let store = TestStore::widgets();
        store.insert_synced("r-1", "a");
        store.rename("r-1", "b");
        store.insert_synced("r-2", "c");
        store.delete("r-2");
        let transport = MockTransport::new();
        transport.fail(Endpoint::PushChanges, 500);

        let before = scan(&*store, "MergeDelete").unwrap();
        assert!(push(&store, &transport, "MergeDelete").is_err());
        let after = scan(&*store, "MergeDelete").unwrap();

        assert_eq!(before, after);
        assert_eq!(store.merge_update("r-1"), 1);
        assert_eq!(store.tombstones().len(), 1);
    }

    #[test]
    fn edit_during_push_keeps_row_dirty() {
        let store = TestStore::widgets();
        store.insert_synced("r-1", "a");
        store.rename("r-1", "b");
        let transport = MockTransport::new();
        let path = store.path().to_path_buf();
        transport.on_push(move |_| {
            let other = SqliteStore::open(&path).unwrap();
            other
                .execute(&amplisync_storage::Statement::new(
                    "UPDATE Widgets SET name = 'c' WHERE RowId = 'r-1'",
                ))
                .unwrap();
        });

        let summary = push(&store, &transport, "MergeDelete").unwrap();
        assert_eq!(summary.cleared, 0);
        assert_eq!(summary.still_dirty, 1);
        assert_eq!(store.merge_update("r-1"), 2);
    }
}
