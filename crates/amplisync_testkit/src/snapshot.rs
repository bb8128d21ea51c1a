//! Snapshot archives for bootstrap tests.

use crate::fixtures::TestStore;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Entry name the server uses for the database inside the snapshot.
pub const SNAPSHOT_ENTRY: &str = "amperflow.db";

/// Builds a zip archive holding `entries`.
pub fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in entries {
        writer
            .start_file(*name, options)
            .expect("Failed to start zip entry");
        writer.write_all(bytes).expect("Failed to write zip entry");
    }
    writer
        .finish()
        .expect("Failed to finish zip archive")
        .into_inner()
}

/// A snapshot archive and the database bytes it contains.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// The zip archive as served by `prepopulate-db`.
    pub archive: Vec<u8>,
    /// The database file inside the archive.
    pub database: Vec<u8>,
}

impl Snapshot {
    /// Builds a snapshot of a `Widgets` database with the given synced rows.
    pub fn widgets(rows: &[(&str, &str)]) -> Self {
        let store = TestStore::widgets();
        for (row_id, name) in rows {
            store.insert_synced(row_id, name);
        }
        let (_dir, path) = store.into_file();
        let database = std::fs::read(&path).expect("Failed to read snapshot database");
        Self::from_database(database)
    }

    /// Wraps raw database bytes in an archive under [`SNAPSHOT_ENTRY`].
    pub fn from_database(database: Vec<u8>) -> Self {
        let archive = zip_archive(&[(SNAPSHOT_ENTRY, database.as_slice())]);
        Self { archive, database }
    }
}
