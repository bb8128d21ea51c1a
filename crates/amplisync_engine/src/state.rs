//! Sync engine state machine.

use crate::bootstrap::{prepopulate_if_missing, BootstrapOutcome};
use crate::capture::{scan, ScanResult};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::migration::apply_pending;
use crate::pull::{pull_tables, PullProgress, PullSummary};
use crate::push::{push, PushSummary};
use crate::schema::{list_syncable_tables, SyncableTable};
use crate::transport::SyncTransport;
use amplisync_storage::SqliteStore;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Engine is installing the server snapshot.
    Bootstrapping,
    /// Engine is applying schema migrations.
    Migrating,
    /// Engine is pulling changes from the server.
    Pulling,
    /// Engine is pushing changes to the server.
    Pushing,
    /// Engine has completed a sync operation.
    Synced,
    /// Engine encountered an error.
    Error,
}

impl SyncState {
    /// Returns true if the engine is in an active sync state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Bootstrapping | SyncState::Migrating | SyncState::Pulling | SyncState::Pushing
        )
    }

    /// Returns true if the engine can start a new operation.
    pub fn can_start_sync(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncState::Idle => "idle",
            SyncState::Bootstrapping => "bootstrapping",
            SyncState::Migrating => "migrating",
            SyncState::Pulling => "pulling",
            SyncState::Pushing => "pushing",
            SyncState::Synced => "synced",
            SyncState::Error => "error",
        })
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Full sync cycles completed.
    pub cycles_completed: u64,
    /// Rows sent by successful pushes.
    pub rows_pushed: u64,
    /// Records applied by pulls.
    pub records_pulled: u64,
    /// Batches applied by pulls.
    pub batches_applied: u64,
    /// Migrations applied.
    pub migrations_applied: u64,
    /// Last successful sync cycle.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Notification sent to [`SyncEngine::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The engine moved to a new state.
    StateChanged(SyncState),
    /// Pull progress, a fraction in `[0, 1]`.
    Progress(f64),
}

/// Result of a sync cycle.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Pull phase summary.
    pub pull: PullSummary,
    /// Push phase summary.
    pub push: PushSummary,
    /// Duration of the cycle.
    pub duration: Duration,
}

/// The sync engine manages synchronization with a remote server.
///
/// It owns the local database connection: [`SyncEngine::initialize`] (or
/// [`SyncEngine::connect`]) opens it, [`SyncEngine::close`] and
/// [`SyncEngine::logout`] release it. `pull` and `push` initialize lazily
/// when no connection is open.
///
/// The host must not run two operations at once; an operation started while
/// another is active fails with [`SyncError::InvalidStateTransition`].
pub struct SyncEngine<T: SyncTransport> {
    config: SyncConfig,
    transport: T,
    store: Mutex<Option<SqliteStore>>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    progress: RwLock<f64>,
    subscribers: Mutex<Vec<Sender<SyncEvent>>>,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Creates a new sync engine. No connection is opened.
    pub fn new(config: SyncConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            store: Mutex::new(None),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            progress: RwLock::new(0.0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Gets the progress of the current or last pull.
    pub fn progress(&self) -> f64 {
        *self.progress.read()
    }

    /// Returns a receiver for state and progress events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Returns true if a database connection is open.
    pub fn is_connected(&self) -> bool {
        self.store.lock().is_some()
    }

    /// Prepares the device for the session: closes any open connection,
    /// installs the server snapshot if there is no local database, and
    /// connects.
    ///
    /// # Errors
    ///
    /// Returns the bootstrap or connection error.
    pub fn initialize(&self) -> SyncResult<BootstrapOutcome> {
        self.begin("bootstrapping", SyncState::Bootstrapping)?;
        let result = self.run_initialize();
        self.finish(result, SyncState::Idle)
    }

    /// Opens the local database if it is not open yet.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the database file does not exist (run
    /// [`SyncEngine::initialize`] first), or a storage error if it cannot be
    /// opened.
    pub fn connect(&self) -> SyncResult<()> {
        let mut guard = self.store.lock();
        if guard.is_some() {
            return Ok(());
        }
        let path = self.config.location.db_path();
        if !path.is_file() {
            return Err(SyncError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no database at {}", path.display()),
            )));
        }
        *guard = Some(SqliteStore::open(&path)?);
        info!(path = %path.display(), "database connected");
        Ok(())
    }

    /// Closes the database connection. Closing when not connected succeeds.
    ///
    /// # Errors
    ///
    /// Returns a storage error if SQLite refuses to close.
    pub fn close(&self) -> SyncResult<()> {
        if let Some(store) = self.store.lock().take() {
            store.close()?;
            info!("database closed");
        }
        Ok(())
    }

    /// Runs pending migrations, then pulls every syncable table.
    ///
    /// # Errors
    ///
    /// Returns the first error; see [`crate::pull()`].
    pub fn pull(&self) -> SyncResult<PullSummary> {
        self.begin("pulling", self.entry_state(SyncState::Migrating))?;
        let result = self.run_pull();
        self.finish(result, SyncState::Synced)
    }

    /// Sends local changes and acknowledges them.
    ///
    /// # Errors
    ///
    /// Returns the first error; see [`crate::push()`].
    pub fn push(&self) -> SyncResult<PushSummary> {
        self.begin("pushing", self.entry_state(SyncState::Pushing))?;
        let result = self.run_push();
        self.finish(result, SyncState::Synced)
    }

    /// Performs a full sync cycle: migrations, pull, then push.
    ///
    /// # Errors
    ///
    /// Returns the first error. A failed pull skips the push.
    pub fn sync(&self) -> SyncResult<SyncReport> {
        self.begin("sync", self.entry_state(SyncState::Migrating))?;
        let start = Instant::now();

        let result = self.run_pull().and_then(|pull| {
            let push = self.run_push()?;
            Ok(SyncReport {
                pull,
                push,
                duration: start.elapsed(),
            })
        });

        if let Ok(report) = &result {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.last_sync_time = Some(Instant::now());
            info!(
                duration_ms = report.duration.as_millis() as u64,
                "sync cycle complete"
            );
        }
        self.finish(result, SyncState::Synced)
    }

    /// Collects pending local changes without sending them.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if no connection is open.
    pub fn scan(&self) -> SyncResult<ScanResult> {
        let guard = self.store.lock();
        let store = guard.as_ref().ok_or(SyncError::NotConnected)?;
        scan(store, &self.config.tombstone_table)
    }

    /// Lists the syncable tables.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if no connection is open.
    pub fn tables(&self) -> SyncResult<Vec<SyncableTable>> {
        let guard = self.store.lock();
        let store = guard.as_ref().ok_or(SyncError::NotConnected)?;
        list_syncable_tables(store, &self.config.tombstone_table)
    }

    /// Closes the connection and deletes the local database files.
    ///
    /// Everything is best-effort: failures are logged and the engine ends
    /// up idle and disconnected.
    pub fn logout(&self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close database during logout");
        }
        self.config.location.delete_database_files_best_effort();
        *self.progress.write() = 0.0;
        self.set_state(SyncState::Idle);
        info!("logged out");
    }

    fn run_initialize(&self) -> SyncResult<BootstrapOutcome> {
        self.set_state(SyncState::Bootstrapping);
        self.close()?;
        let outcome = prepopulate_if_missing(&self.transport, &self.config)?;
        self.connect()?;
        Ok(outcome)
    }

    fn ensure_connected(&self) -> SyncResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.run_initialize().map(|_| ())
    }

    fn run_pull(&self) -> SyncResult<PullSummary> {
        self.ensure_connected()?;
        let guard = self.store.lock();
        let store = guard.as_ref().ok_or(SyncError::NotConnected)?;
        let device_id = &self.config.device_id;

        self.set_state(SyncState::Migrating);
        let migrations = apply_pending(store, &self.transport, device_id)?;
        self.stats.write().migrations_applied += migrations.applied.len() as u64;

        self.set_state(SyncState::Pulling);
        self.reset_progress();
        let summary = pull_tables(
            store,
            &self.transport,
            device_id,
            &self.config.tombstone_table,
            migrations,
            &mut |progress: &PullProgress| self.set_progress(progress.fraction()),
        )?;

        let mut stats = self.stats.write();
        stats.records_pulled += summary.records as u64;
        stats.batches_applied += summary.batches_applied as u64;
        Ok(summary)
    }

    fn run_push(&self) -> SyncResult<PushSummary> {
        self.ensure_connected()?;
        let guard = self.store.lock();
        let store = guard.as_ref().ok_or(SyncError::NotConnected)?;

        self.set_state(SyncState::Pushing);
        let summary = push(store, &self.transport, &self.config.tombstone_table)?;
        self.stats.write().rows_pushed += summary.total() as u64;
        Ok(summary)
    }

    /// The first active state of an operation: bootstrapping if it has to
    /// connect first. Never blocks; a busy store counts as connected.
    fn entry_state(&self, connected: SyncState) -> SyncState {
        match self.store.try_lock() {
            Some(store) if store.is_none() => SyncState::Bootstrapping,
            _ => connected,
        }
    }

    /// Checks that no operation is active and enters `first` under the same
    /// lock, so two callers cannot both start.
    fn begin(&self, to: &str, first: SyncState) -> SyncResult<()> {
        {
            let mut current = self.state.write();
            if !current.can_start_sync() {
                return Err(SyncError::InvalidStateTransition {
                    from: current.to_string(),
                    to: to.to_string(),
                });
            }
            *current = first;
        }
        self.emit(SyncEvent::StateChanged(first));
        Ok(())
    }

    fn finish<R>(&self, result: SyncResult<R>, done: SyncState) -> SyncResult<R> {
        match &result {
            Ok(_) => {
                self.stats.write().last_error = None;
                self.set_state(done);
            }
            Err(err) => self.handle_error(err),
        }
        result
    }

    fn set_state(&self, state: SyncState) {
        let changed = {
            let mut current = self.state.write();
            let changed = *current != state;
            *current = state;
            changed
        };
        if changed {
            self.emit(SyncEvent::StateChanged(state));
        }
    }

    fn reset_progress(&self) {
        *self.progress.write() = 0.0;
        self.emit(SyncEvent::Progress(0.0));
    }

    /// Progress only moves forward within a pull.
    fn set_progress(&self, value: f64) {
        let value = value.clamp(0.0, 1.0);
        {
            let mut current = self.progress.write();
            if value < *current {
                return;
            }
            *current = value;
        }
        self.emit(SyncEvent::Progress(value));
    }

    fn emit(&self, event: SyncEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Handles an error by updating state and stats.
    fn handle_error(&self, error: &SyncError) {
        warn!(error = %error, state = %self.state(), "sync operation failed");
        self.stats.write().last_error = Some(error.to_string());
        self.set_state(SyncState::Error);
    }
}

impl<T: SyncTransport> fmt::Debug for SyncEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
