//! Pull: apply server changes table by table.
//!
//! A pull first brings the schema up to date, then for every syncable table
//! fetches one compressed body of [`PullBatch`]es. Each batch is applied in
//! its own transaction with the table's capture triggers dropped, and only
//! then acknowledged with `commit-sync/{SyncId}`. A batch without records
//! is acknowledged without touching the database.

use crate::error::{SyncError, SyncResult};
use crate::migration::{apply_pending, MigrationOutcome};
use crate::schema::list_syncable_tables;
use crate::transport::SyncTransport;
use crate::triggers::{with_triggers_suspended, TriggerScripts};
use amplisync_protocol::{decode_pull_response, PullBatch};
use amplisync_storage::{Params, SqlExecutor, SqlValue, SqliteStore, Statement, StoreTransaction};
use serde_json::Value;
use tracing::{debug, info};

/// Progress of a pull, reported once per table.
#[derive(Debug, Clone, PartialEq)]
pub struct PullProgress {
    /// Table just finished, or `None` when there was nothing to pull.
    pub table: Option<String>,
    /// Tables finished so far.
    pub completed: usize,
    /// Tables in this pull.
    pub total: usize,
}

impl PullProgress {
    /// Fraction of tables finished, in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// What a pull applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullSummary {
    /// Migrations applied before the tables were pulled.
    pub migrations: usize,
    /// Tables pulled.
    pub tables: usize,
    /// Batches received and committed.
    pub batches: usize,
    /// Batches that carried records and were applied.
    pub batches_applied: usize,
    /// Records applied across all batches.
    pub records: usize,
}

/// Runs pending migrations, then pulls every syncable table.
///
/// # Errors
///
/// Stops at the first failure: a migration error, a transport error, a
/// [`SyncError::Decode`] for a malformed body, or a storage error from an
/// apply (which leaves that batch uncommitted).
pub fn pull<T>(
    store: &SqliteStore,
    transport: &T,
    device_id: &str,
    tombstone_table: &str,
    on_progress: &mut dyn FnMut(&PullProgress),
) -> SyncResult<PullSummary>
where
    T: SyncTransport + ?Sized,
{
    let migrations = apply_pending(store, transport, device_id)?;
    pull_tables(store, transport, device_id, tombstone_table, migrations, on_progress)
}

/// Pulls every syncable table. Migrations must already be applied; their
/// outcome is carried into the summary.
///
/// # Errors
///
/// See [`pull`].
pub fn pull_tables<T>(
    store: &SqliteStore,
    transport: &T,
    device_id: &str,
    tombstone_table: &str,
    migrations: MigrationOutcome,
    on_progress: &mut dyn FnMut(&PullProgress),
) -> SyncResult<PullSummary>
where
    T: SyncTransport + ?Sized,
{
    let tables = list_syncable_tables(store, tombstone_table)?;
    let mut summary = PullSummary {
        migrations: migrations.applied.len(),
        ..PullSummary::default()
    };
    info!(tables = tables.len(), "pulling changes");

    if tables.is_empty() {
        on_progress(&PullProgress {
            table: None,
            completed: 0,
            total: 0,
        });
    }

    for (index, table) in tables.iter().enumerate() {
        pull_table(store, transport, device_id, &table.name, &mut summary)?;
        summary.tables += 1;
        on_progress(&PullProgress {
            table: Some(table.name.clone()),
            completed: index + 1,
            total: tables.len(),
        });
    }

    info!(
        tables = summary.tables,
        batches = summary.batches,
        records = summary.records,
        "pull complete"
    );
    Ok(summary)
}

fn pull_table<T>(
    store: &SqliteStore,
    transport: &T,
    device_id: &str,
    table: &str,
    summary: &mut PullSummary,
) -> SyncResult<()>
where
    T: SyncTransport + ?Sized,
{
    let body = transport.fetch_batch(table, device_id)?;
    let batches = decode_pull_response(&body).map_err(|source| SyncError::Decode {
        table: table.to_string(),
        source,
    })?;
    debug!(
        table = %table,
        batches = batches.len(),
        records = batches.iter().map(PullBatch::record_count).sum::<usize>(),
        bytes = body.len(),
        "received batches"
    );

    for batch in &batches {
        if let Some(size) = batch.max_package_size {
            debug!(table = %table, sync_id = %batch.sync_id, max_package_size = size, "batch page size");
        }
        if batch.has_records() {
            let applied = with_triggers_suspended(store, &TriggerScripts::from(batch), |tx| {
                apply_batch(tx, batch)
            })?;
            summary.batches_applied += 1;
            summary.records += applied;
            debug!(table = %table, sync_id = %batch.sync_id, records = applied, "applied batch");
        }
        transport.commit_batch(&batch.sync_id)?;
        summary.batches += 1;
    }
    Ok(())
}

/// Applies a batch's records with its templates, in insert, update, delete
/// order. Returns the number of records applied.
fn apply_batch(tx: &StoreTransaction<'_>, batch: &PullBatch) -> SyncResult<usize> {
    let mut applied = 0;
    for (_kind, template, records) in batch.operations() {
        for record in records {
            tx.execute(&record_statement(template, record))?;
            applied += 1;
        }
    }
    Ok(applied)
}

/// Binds a record to a template: arrays positionally, objects by name.
fn record_statement(template: &str, record: &Value) -> Statement {
    let params = match record {
        Value::Array(items) => Params::Positional(items.iter().map(json_to_sql).collect()),
        Value::Object(fields) => Params::Named(
            fields
                .iter()
                .map(|(name, value)| (name.clone(), json_to_sql(value)))
                .collect(),
        ),
        scalar => Params::Positional(vec![json_to_sql(scalar)]),
    };
    Statement {
        sql: template.to_string(),
        params,
    }
}

/// Converts a record value to a column value.
fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}
