//! Schema migrations pushed by the server.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use amplisync_protocol::{MigrationId, MigrationReport};
use amplisync_storage::{SqlExecutor, SqliteStore, StorageError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Migrations applied by one [`apply_pending`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationOutcome {
    /// Ids of the migrations applied, in order.
    pub applied: Vec<MigrationId>,
}

/// Fetches pending migrations and runs them in ascending id order.
///
/// Each script runs in its own transaction, unless it opens one itself with
/// `BEGIN` or `SAVEPOINT`; such a script runs as written and any transaction
/// it leaves open is rolled back. Every outcome is reported back with its execution time
/// in milliseconds. On the first failing script a failure report is sent
/// (a report that cannot be delivered is only logged) and the sequence
/// stops.
///
/// # Errors
///
/// Returns [`SyncError::Schema`] for a failing script, or the transport
/// error if the listing or a success report fails.
pub fn apply_pending<T>(
    store: &SqliteStore,
    transport: &T,
    device_id: &str,
) -> SyncResult<MigrationOutcome>
where
    T: SyncTransport + ?Sized,
{
    let mut pending = transport.list_migrations(device_id)?;
    pending.sort_by(|a, b| a.id.cmp(&b.id));
    let mut outcome = MigrationOutcome::default();

    if pending.is_empty() {
        debug!("no pending migrations");
        return Ok(outcome);
    }
    info!(count = pending.len(), "applying migrations");

    for migration in pending {
        let started = Instant::now();
        let result = if manages_own_transaction(&migration.query) {
            debug!(id = %migration.id, "migration controls its own transaction");
            store.execute_script_standalone(&migration.query)
        } else {
            store.transaction(|tx| tx.execute_script(&migration.query))
        };
        let elapsed = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                debug!(id = %migration.id, elapsed_ms = elapsed, "migration applied");
                transport.report_migration(&MigrationReport::success(
                    migration.id.clone(),
                    elapsed,
                ))?;
                outcome.applied.push(migration.id);
            }
            Err(err) => {
                let message = failure_message(&err);
                warn!(id = %migration.id, error = %message, "migration failed");
                let report = MigrationReport::failure(migration.id.clone(), elapsed, &message);
                if let Err(report_err) = transport.report_migration(&report) {
                    warn!(id = %migration.id, error = %report_err, "failed to report migration failure");
                }
                return Err(SyncError::Schema {
                    migration_id: migration.id.to_string(),
                    message,
                });
            }
        }
    }

    info!(applied = outcome.applied.len(), "migrations complete");
    Ok(outcome)
}

/// True if a statement of `script` starts with `BEGIN` or `SAVEPOINT`.
///
/// A `CREATE TRIGGER ... BEGIN` body does not count: its `BEGIN` is never the
/// first word of a statement.
fn manages_own_transaction(script: &str) -> bool {
    script.split(';').any(|statement| {
        let word = first_keyword(statement);
        word.eq_ignore_ascii_case("BEGIN") || word.eq_ignore_ascii_case("SAVEPOINT")
    })
}

fn first_keyword(statement: &str) -> &str {
    let mut rest = statement.trim_start();
    while let Some(comment) = rest.strip_prefix("--") {
        rest = comment.split_once('\n').map_or("", |(_, tail)| tail).trim_start();
    }
    rest.split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or("")
}

fn failure_message(err: &StorageError) -> String {
    match err {
        StorageError::Sqlite(inner) => inner.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Endpoint, MockTransport, TransportCall};
    use amplisync_protocol::{PendingMigration, ServerId};
    use amplisync_storage::Statement;

    fn migration(id: ServerId, query: &str) -> PendingMigration {
        PendingMigration {
            id,
            query: query.into(),
        }
    }

    fn has_table(store: &SqliteStore, name: &str) -> bool {
        crate::schema::table_exists(store, name).unwrap()
    }

    #[test]
    fn applies_in_ascending_order_and_reports() {
        let store = SqliteStore::open_in_memory().unwrap();
        let transport = MockTransport::new();
        transport.set_migrations(vec![
            migration(ServerId::from(10), "ALTER TABLE A ADD COLUMN c TEXT"),
            migration(ServerId::from("2"), "CREATE TABLE A (b TEXT)"),
        ]);

        let outcome = apply_pending(&store, &transport, "dev").unwrap();
        assert_eq!(outcome.applied, vec![ServerId::from("2"), ServerId::from(10)]);

        let reports = transport.reports();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(MigrationReport::is_success));
        assert_eq!(reports[0].id, ServerId::from("2"));
        store
            .execute(&Statement::new("INSERT INTO A (b, c) VALUES ('x', 'y')"))
            .unwrap();
    }

    #[test]
    fn failure_stops_sequence_and_is_reported() {
        let store = SqliteStore::open_in_memory().unwrap();
        let transport = MockTransport::new();
        transport.set_migrations(vec![
            migration(ServerId::from(1), "CREATE TABLE A (b TEXT)"),
            migration(ServerId::from(2), "ALTER TABLE Missing ADD COLUMN c TEXT"),
            migration(ServerId::from(3), "CREATE TABLE C (d TEXT)"),
        ]);

        let err = apply_pending(&store, &transport, "dev").unwrap_err();
        match err {
            SyncError::Schema {
                migration_id,
                message,
            } => {
                assert_eq!(migration_id, "2");
                assert!(message.contains("Missing"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let reports = transport.reports();
        assert_eq!(reports.len(), 2);
        assert!(reports[0].is_success());
        assert!(!reports[1].is_success());
        assert!(has_table(&store, "A"));
        assert!(!has_table(&store, "C"));
    }

    #[test]
    fn failed_script_is_rolled_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let transport = MockTransport::new();
        transport.set_migrations(vec![migration(
            ServerId::from(1),
            "CREATE TABLE A (b TEXT); INSERT INTO Missing VALUES (1);",
        )]);

        assert!(apply_pending(&store, &transport, "dev").is_err());
        assert!(!has_table(&store, "A"));
    }

    #[test]
    fn script_with_own_transaction_is_applied() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.execute_script("CREATE TABLE A (b TEXT)").unwrap();
        store
            .execute(&Statement::new("INSERT INTO A (b) VALUES ('kept')"))
            .unwrap();
        let transport = MockTransport::new();
        transport.set_migrations(vec![
            migration(ServerId::from(1), "BEGIN TRANSACTION; CREATE TABLE B (c TEXT); COMMIT;"),
            migration(
                ServerId::from(2),
                "PRAGMA foreign_keys = OFF;
                 BEGIN;
                 CREATE TABLE A_new (b TEXT, d INTEGER DEFAULT 0);
                 INSERT INTO A_new (b) SELECT b FROM A;
                 DROP TABLE A;
                 ALTER TABLE A_new RENAME TO A;
                 COMMIT;
                 PRAGMA foreign_keys = ON;",
            ),
        ]);

        let outcome = apply_pending(&store, &transport, "dev").unwrap();
        assert_eq!(outcome.applied.len(), 2);
        assert!(transport.reports().iter().all(MigrationReport::is_success));
        assert!(has_table(&store, "B"));
        let rows = store
            .query(&Statement::new("SELECT b, d FROM A"))
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn failed_script_with_own_transaction_leaves_store_usable() {
        let store = SqliteStore::open_in_memory().unwrap();
        let transport = MockTransport::new();
        transport.set_migrations(vec![migration(
            ServerId::from(1),
            "BEGIN; CREATE TABLE A (b TEXT); INSERT INTO Missing VALUES (1); COMMIT;",
        )]);

        assert!(matches!(
            apply_pending(&store, &transport, "dev"),
            Err(SyncError::Schema { .. })
        ));
        assert!(!has_table(&store, "A"));
        store
            .transaction(|tx| tx.execute_script("CREATE TABLE Z (a TEXT)"))
            .unwrap();
    }

    #[test]
    fn detects_transaction_control() {
        assert!(manages_own_transaction("BEGIN; CREATE TABLE A (b TEXT); COMMIT;"));
        assert!(manages_own_transaction("PRAGMA foreign_keys=OFF;\n  begin immediate;"));
        assert!(manages_own_transaction("-- rebuild\nBEGIN TRANSACTION;"));
        assert!(manages_own_transaction("SAVEPOINT s1; RELEASE s1;"));
        assert!(!manages_own_transaction("CREATE TABLE A (b TEXT)"));
        assert!(!manages_own_transaction(
            "CREATE TRIGGER t AFTER INSERT ON A BEGIN UPDATE A SET b = 1; END;"
        ));
        assert!(!manages_own_transaction("CREATE TABLE BEGINNINGS (a TEXT)"));
    }

    #[test]
    fn report_failure_does_not_mask_schema_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let transport = MockTransport::new();
        transport.set_migrations(vec![migration(ServerId::from(1), "NOT SQL")]);
        transport.fail(Endpoint::ReportMigration, 503);

        let err = apply_pending(&store, &transport, "dev").unwrap_err();
        assert!(matches!(err, SyncError::Schema { .. }));
    }

    #[test]
    fn listing_failure_runs_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let transport = MockTransport::new();
        transport.fail(Endpoint::ListMigrations, 401);

        let err = apply_pending(&store, &transport, "dev").unwrap_err();
        assert!(matches!(err, SyncError::Transport { .. }));
        assert_eq!(
            transport.calls(),
            vec![TransportCall::ListMigrations {
                device_id: "dev".into()
            }]
        );
    }
}
