//! Suspending change-capture triggers while remote rows are written.

use crate::error::SyncResult;
use amplisync_protocol::PullBatch;
use amplisync_storage::{SqlExecutor, SqliteStore, StoreTransaction};
use tracing::debug;

/// Drop and create scripts for a table's three capture triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerScripts<'a> {
    /// Insert, update and delete trigger drop scripts.
    pub drops: [&'a str; 3],
    /// Insert, update and delete trigger creation scripts.
    pub creates: [&'a str; 3],
}

impl<'a> From<&'a PullBatch> for TriggerScripts<'a> {
    fn from(batch: &'a PullBatch) -> Self {
        Self {
            drops: batch.trigger_drops(),
            creates: batch.trigger_creates(),
        }
    }
}

/// Runs `body` with the triggers dropped.
///
/// Drops, `body` and re-creation share one transaction: if anything fails
/// the drops roll back with it, so the triggers are never left missing.
/// Empty scripts are skipped.
///
/// # Errors
///
/// Returns the first error from a script or from `body`.
pub fn with_triggers_suspended<R, F>(
    store: &SqliteStore,
    triggers: &TriggerScripts<'_>,
    body: F,
) -> SyncResult<R>
where
    F: FnOnce(&StoreTransaction<'_>) -> SyncResult<R>,
{
    store.transaction(|tx| {
        run_scripts(tx, &triggers.drops)?;
        let value = body(tx)?;
        run_scripts(tx, &triggers.creates)?;
        Ok(value)
    })
}

fn run_scripts(tx: &StoreTransaction<'_>, scripts: &[&str]) -> SyncResult<()> {
    for script in scripts.iter().filter(|s| !s.trim().is_empty()) {
        debug!(script = %script, "running trigger script");
        tx.execute_script(script)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use amplisync_storage::Statement;
    use amplisync_testkit::{
        TestStore, WIDGETS_DELETE_TRIGGER, WIDGETS_INSERT_TRIGGER, WIDGETS_TRIGGER_DROPS,
        WIDGETS_TRIGGER_NAMES, WIDGETS_UPDATE_TRIGGER,
    };

    fn widgets_scripts() -> TriggerScripts<'static> {
        TriggerScripts {
            drops: WIDGETS_TRIGGER_DROPS,
            creates: [
                WIDGETS_INSERT_TRIGGER,
                WIDGETS_UPDATE_TRIGGER,
                WIDGETS_DELETE_TRIGGER,
            ],
        }
    }

    #[test]
    fn body_runs_without_capture() {
        let store = TestStore::widgets();
        with_triggers_suspended(&store, &widgets_scripts(), |tx| {
            let names = tx.query(&Statement::new(
                "SELECT name FROM sqlite_master WHERE type = 'trigger'",
            ))?;
            assert!(names.is_empty());
            tx.execute(&Statement::new(
                "INSERT INTO Widgets (RowId, name) VALUES ('r-1', 'remote')",
            ))?;
            Ok(())
        })
        .unwrap();

        assert_eq!(store.merge_update("r-1"), 0);
        assert_eq!(store.trigger_names(), WIDGETS_TRIGGER_NAMES.to_vec());
    }

    #[test]
    fn failure_restores_triggers() {
        let store = TestStore::widgets();
        let result: SyncResult<()> = with_triggers_suspended(&store, &widgets_scripts(), |tx| {
            tx.execute(&Statement::new(
                "INSERT INTO Widgets (RowId, name) VALUES ('r-1', 'remote')",
            ))?;
            tx.execute(&Statement::new("INSERT INTO Nowhere VALUES (1)"))?;
            Ok(())
        });

        assert!(matches!(result, Err(SyncError::Storage(_))));
        assert_eq!(store.trigger_names(), WIDGETS_TRIGGER_NAMES.to_vec());
        assert_eq!(store.count("Widgets"), 0);
    }

    #[test]
    fn failing_create_script_rolls_back_everything() {
        let store = TestStore::widgets();
        let mut scripts = widgets_scripts();
        scripts.creates[1] = "CREATE TRIGGER broken";
        let result = with_triggers_suspended(&store, &scripts, |_| Ok(()));

        assert!(result.is_err());
        assert_eq!(store.trigger_names(), WIDGETS_TRIGGER_NAMES.to_vec());
    }

    #[test]
    fn empty_scripts_are_skipped() {
        let store = TestStore::widgets();
        let scripts = TriggerScripts {
            drops: ["", " ", ""],
            creates: ["", "", ""],
        };
        let value = with_triggers_suspended(&store, &scripts, |_| Ok(5)).unwrap();
        assert_eq!(value, 5);
        assert_eq!(store.trigger_names(), WIDGETS_TRIGGER_NAMES.to_vec());
    }
}
