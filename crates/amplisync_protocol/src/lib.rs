//! # AmpliSync Protocol
//!
//! Wire types and codecs for the AmpliSync protocol.
//!
//! This crate provides:
//! - [`OutgoingChangeSet`], the body of a push, and its value-encoding rule
//! - [`PendingMigration`] and [`MigrationReport`] for the migration audit loop
//! - [`PullBatch`] and [`decode_pull_response`] for compressed pull bodies
//! - [`ServerId`], the loosely typed identifiers the server hands out
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod changes;
mod error;
mod ids;
mod migration;

pub use batch::{decode_pull_response, BatchRecords, PullBatch, TemplateKind};
pub use changes::{encode_value, OutgoingChangeSet, RowPayload, TableChanges, TableDelete};
pub use error::{ProtocolError, ProtocolResult};
pub use ids::{MigrationId, ServerId, SyncId};
pub use migration::{MigrationReport, PendingMigration, MIGRATION_OK};
