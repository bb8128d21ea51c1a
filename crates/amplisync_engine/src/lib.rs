//! # AmpliSync Engine
//!
//! Offline-first synchronization between an on-device SQLite database and
//! an AmpliSync server.
//!
//! This crate provides:
//! - Database location per platform and session persistence
//! - First-run bootstrap from a server snapshot archive
//! - Change capture: dirty rows (`MergeUpdate > 0`) and tombstones
//! - Push with compare-and-clear acknowledgement
//! - Schema migrations applied in server order and reported back
//! - Pull of compressed batches with capture triggers suspended
//! - Sync state machine (idle → migrating → pulling → pushing → synced)
//! - HTTP transport abstraction
//!
//! ## Architecture
//!
//! A sync cycle is **migrate, pull, then push**:
//! 1. Apply pending migrations so local schema matches the server
//! 2. Pull every syncable table, one batch per transaction, acknowledging
//!    each batch only after it is applied
//! 3. Scan local changes, post them, and clear only rows that were not
//!    edited again while the push was in flight
//!
//! ## Key Invariants
//!
//! - A batch is committed to the server only after its local apply succeeded
//! - Applying server changes never marks rows dirty
//! - A dirty flag is cleared only if it still holds the pushed value
//! - An existing local database is never overwritten by bootstrap

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![cfg_attr(not(test), warn(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod bootstrap;
mod capture;
mod config;
mod error;
mod http;
mod location;
mod migration;
mod pull;
mod push;
mod schema;
mod session;
mod state;
mod transport;
mod triggers;

pub use bootstrap::{prepopulate_if_missing, BootstrapOutcome};
pub use capture::{scan, AckAction, ScanResult};
pub use config::{
    SyncConfig, DEFAULT_ARCHIVE_NAME, DEFAULT_SNAPSHOT_ENTRY, DEFAULT_TOMBSTONE_TABLE,
};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpResponse, HttpTransport, ReqwestClient, API_BASE_PATH};
pub use location::{DatabaseLocation, Platform, DEFAULT_DATABASE_NAME};
pub use migration::{apply_pending, MigrationOutcome};
pub use pull::{pull, pull_tables, PullProgress, PullSummary};
pub use push::{push, PushSummary};
pub use schema::{list_syncable_tables, parse_columns, table_exists, SyncableTable};
pub use session::{Session, SessionStore};
pub use state::{SyncEngine, SyncEvent, SyncReport, SyncState, SyncStats};
pub use transport::{Endpoint, MockTransport, SyncTransport, TransportCall};
pub use triggers::{with_triggers_suspended, TriggerScripts};
