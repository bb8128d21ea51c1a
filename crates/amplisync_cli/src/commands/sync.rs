//! Bootstrap, pull, push and sync commands.

use super::{CliEngine, CommandResult, Context};
use amplisync_engine::{BootstrapOutcome, PullSummary, PushSummary, SyncEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Downloads the server snapshot if there is no local database.
pub fn bootstrap(context: &Context) -> CommandResult {
    let _lock = context.lock()?;
    let engine = context.engine()?;
    match engine.initialize()? {
        BootstrapOutcome::Skipped => println!(
            "Database already present at {}",
            context.location().db_path().display()
        ),
        BootstrapOutcome::Downloaded { archive_bytes } => println!(
            "Installed snapshot ({archive_bytes} bytes) at {}",
            context.location().db_path().display()
        ),
    }
    engine.close()?;
    Ok(())
}

/// Applies migrations and pulls server changes.
pub fn pull(context: &Context) -> CommandResult {
    let _lock = context.lock()?;
    let engine = context.engine()?;
    let summary = with_progress(&engine, |engine| engine.pull())?;
    print_pull(&summary);
    engine.close()?;
    Ok(())
}

/// Pushes local changes.
pub fn push(context: &Context) -> CommandResult {
    let _lock = context.lock()?;
    let engine = context.engine()?;
    let summary = engine.push()?;
    print_push(&summary);
    engine.close()?;
    Ok(())
}

/// Runs a full sync cycle.
pub fn sync(context: &Context) -> CommandResult {
    let _lock = context.lock()?;
    let engine = context.engine()?;
    let report = with_progress(&engine, |engine| engine.sync())?;
    print_pull(&report.pull);
    print_push(&report.push);
    println!("Sync finished in {} ms", report.duration.as_millis());
    engine.close()?;
    Ok(())
}

/// Runs `op` while a listener thread logs engine events.
fn with_progress<R, F>(engine: &CliEngine, op: F) -> R
where
    F: FnOnce(&CliEngine) -> R,
{
    let events = engine.subscribe();
    let done = AtomicBool::new(false);
    let stop = &done;
    thread::scope(|scope| {
        scope.spawn(move || loop {
            match events.recv_timeout(POLL_INTERVAL) {
                Ok(event) => log_event(&event),
                Err(RecvTimeoutError::Timeout) if !stop.load(Ordering::Acquire) => {}
                Err(_) => break,
            }
        });
        let result = op(engine);
        done.store(true, Ordering::Release);
        result
    })
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::StateChanged(state) => debug!(%state, "state changed"),
        SyncEvent::Progress(fraction) => {
            info!(percent = (fraction * 100.0).round() as u32, "pull progress")
        }
    }
}

fn print_pull(summary: &PullSummary) {
    println!(
        "Pulled {} records in {} batches from {} tables ({} migrations applied)",
        summary.records, summary.batches, summary.tables, summary.migrations
    );
}

fn print_push(summary: &PushSummary) {
    println!(
        "Pushed {} inserts, {} updates, {} deletes ({} acknowledged, {} still dirty)",
        summary.inserts, summary.updates, summary.deletes, summary.cleared, summary.still_dirty
    );
}
