//! One-time seeding of a fresh device from a server snapshot.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::location::remove_file_best_effort;
use crate::transport::SyncTransport;
use std::fs::File;
use tracing::{debug, info};
use zip::ZipArchive;

/// What [`prepopulate_if_missing`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// A database already existed; nothing was downloaded.
    Skipped,
    /// A snapshot was downloaded and installed.
    Downloaded {
        /// Size of the downloaded archive in bytes.
        archive_bytes: u64,
    },
}

/// Installs the server snapshot unless a local database already exists.
///
/// The archive is downloaded next to the database, unpacked there, and its
/// database entry renamed to `{name}.db`. An existing database is never
/// touched and no request is made.
///
/// # Errors
///
/// Returns the transport error if the download fails, or
/// [`SyncError::Archive`] if the archive is unreadable or lacks the
/// database entry.
pub fn prepopulate_if_missing<T>(transport: &T, config: &SyncConfig) -> SyncResult<BootstrapOutcome>
where
    T: SyncTransport + ?Sized,
{
    let location = &config.location;
    std::fs::create_dir_all(location.dir())?;

    let db_path = location.db_path();
    if db_path.exists() {
        debug!(path = %db_path.display(), "database present, skipping bootstrap");
        return Ok(BootstrapOutcome::Skipped);
    }

    let archive_path = location.file(&config.archive_name);
    remove_file_best_effort(&archive_path);

    info!(device_id = %config.device_id, "downloading database snapshot");
    transport.download_snapshot(&config.device_id, &archive_path)?;
    let archive_bytes = std::fs::metadata(&archive_path)?.len();

    let mut archive = ZipArchive::new(File::open(&archive_path)?)?;
    archive.extract(location.dir())?;

    let extracted = location.file(&config.snapshot_entry);
    if !extracted.is_file() {
        return Err(SyncError::Archive(format!(
            "snapshot does not contain {}",
            config.snapshot_entry
        )));
    }
    std::fs::rename(&extracted, &db_path)?;
    remove_file_best_effort(&archive_path);

    info!(path = %db_path.display(), archive_bytes, "database snapshot installed");
    Ok(BootstrapOutcome::Downloaded { archive_bytes })
}
