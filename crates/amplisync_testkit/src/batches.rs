//! Pull batch builders and compressed body encoders.

use crate::fixtures::{
    WIDGETS_DELETE_TRIGGER, WIDGETS_INSERT_TRIGGER, WIDGETS_TRIGGER_DROPS, WIDGETS_UPDATE_TRIGGER,
};
use amplisync_protocol::{BatchRecords, PullBatch, ServerId};
use flate2::write::{DeflateEncoder, ZlibEncoder};
use flate2::Compression;
use serde_json::Value;
use std::io::Write;

/// Insert template for `Widgets`, bound positionally as `[RowId, name]`.
pub const WIDGETS_QUERY_INSERT: &str = "INSERT INTO Widgets (RowId, name) VALUES (?, ?)";

/// Update template for `Widgets`, bound by name as `{RowId, name}`.
pub const WIDGETS_QUERY_UPDATE: &str = "UPDATE Widgets SET name = :name WHERE RowId = :RowId";

/// Delete template for `Widgets`, bound positionally as `[RowId]`.
pub const WIDGETS_QUERY_DELETE: &str = "DELETE FROM Widgets WHERE RowId = ?";

/// Builds [`PullBatch`] values for tests.
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    batch: PullBatch,
}

impl BatchBuilder {
    /// Starts a batch with no templates and no records.
    pub fn new(sync_id: i64) -> Self {
        Self::with_sync_id(ServerId::Number(sync_id))
    }

    /// Starts a batch with an arbitrary cursor.
    pub fn with_sync_id(sync_id: ServerId) -> Self {
        Self {
            batch: PullBatch::empty(sync_id),
        }
    }

    /// Starts a batch carrying the `Widgets` templates and trigger scripts.
    pub fn widgets(sync_id: i64) -> Self {
        let mut builder = Self::new(sync_id);
        let b = &mut builder.batch;
        b.trigger_insert_drop = WIDGETS_TRIGGER_DROPS[0].to_string();
        b.trigger_update_drop = WIDGETS_TRIGGER_DROPS[1].to_string();
        b.trigger_delete_drop = WIDGETS_TRIGGER_DROPS[2].to_string();
        b.trigger_insert = WIDGETS_INSERT_TRIGGER.to_string();
        b.trigger_update = WIDGETS_UPDATE_TRIGGER.to_string();
        b.trigger_delete = WIDGETS_DELETE_TRIGGER.to_string();
        b.query_insert = WIDGETS_QUERY_INSERT.to_string();
        b.query_update = WIDGETS_QUERY_UPDATE.to_string();
        b.query_delete = WIDGETS_QUERY_DELETE.to_string();
        builder
    }

    /// Adds an insert record.
    pub fn insert(mut self, record: Value) -> Self {
        self.records().inserts.push(record);
        self
    }

    /// Adds an update record.
    pub fn update(mut self, record: Value) -> Self {
        self.records().updates.push(record);
        self
    }

    /// Adds a delete record.
    pub fn delete(mut self, record: Value) -> Self {
        self.records().deletes.push(record);
        self
    }

    /// Replaces the insert template.
    pub fn query_insert(mut self, sql: &str) -> Self {
        self.batch.query_insert = sql.to_string();
        self
    }

    /// Replaces the update template.
    pub fn query_update(mut self, sql: &str) -> Self {
        self.batch.query_update = sql.to_string();
        self
    }

    /// Sets the page size hint.
    pub fn max_package_size(mut self, size: u64) -> Self {
        self.batch.max_package_size = Some(size);
        self
    }

    /// Finishes the batch.
    pub fn build(self) -> PullBatch {
        self.batch
    }

    fn records(&mut self) -> &mut BatchRecords {
        self.batch.records.get_or_insert_with(BatchRecords::default)
    }
}

/// Serializes batches as the JSON array the server sends.
pub fn batches_json(batches: &[PullBatch]) -> String {
    serde_json::to_string(batches).expect("Failed to serialize batches")
}

/// Compresses text with raw DEFLATE.
pub fn deflate_raw(text: &str) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .expect("Failed to write deflate stream");
    encoder.finish().expect("Failed to finish deflate stream")
}

/// Compresses text with a zlib wrapper.
pub fn deflate_zlib(text: &str) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .expect("Failed to write zlib stream");
    encoder.finish().expect("Failed to finish zlib stream")
}

/// Encodes batches as a `sync-compressed` response body.
pub fn pull_body(batches: &[PullBatch]) -> Vec<u8> {
    deflate_raw(&batches_json(batches))
}

#[cfg(test)]
mod tests {
    use super::*;
    use amplisync_protocol::decode_pull_response;
    use serde_json::json;

    #[test]
    fn test_pull_body_decodes() {
        let batch = BatchBuilder::widgets(42).insert(json!(["r-1", "a"])).build();
        let decoded = decode_pull_response(&pull_body(&[batch.clone()])).unwrap();
        assert_eq!(decoded, vec![batch]);
    }

    #[test]
    fn test_zlib_body_decodes() {
        let batch = BatchBuilder::new(7).build();
        let body = deflate_zlib(&batches_json(&[batch]));
        let decoded = decode_pull_response(&body).unwrap();
        assert_eq!(decoded.len(), 1);
        assert!(!decoded[0].has_records());
    }
}
