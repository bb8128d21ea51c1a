//! Pull batches and the compressed pull body.
//!
//! `sync-compressed/{table}/{deviceId}` answers with a DEFLATE-compressed
//! JSON document holding one or more [`PullBatch`] objects. Each batch
//! carries the SQL templates needed to apply its records plus the trigger
//! scripts that must be dropped and recreated around the apply.

use crate::error::{ProtocolError, ProtocolResult};
use crate::ids::SyncId;
use flate2::read::{DeflateDecoder, ZlibDecoder};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io::Read;

/// Which template a group of records is applied with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    /// `QueryInsert`.
    Insert,
    /// `QueryUpdate`.
    Update,
    /// `QueryDelete`.
    Delete,
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TemplateKind::Insert => "insert",
            TemplateKind::Update => "update",
            TemplateKind::Delete => "delete",
        })
    }
}

/// One unit of server changes for a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PullBatch {
    /// Cursor acknowledged through `commit-sync/{SyncId}` after the apply.
    pub sync_id: SyncId,
    /// Rows to apply, grouped by operation. `None` when the batch is empty.
    #[serde(default, deserialize_with = "records_from_wire")]
    pub records: Option<BatchRecords>,
    /// Script dropping the insert change-capture trigger.
    #[serde(default)]
    pub trigger_insert_drop: String,
    /// Script dropping the update change-capture trigger.
    #[serde(default)]
    pub trigger_update_drop: String,
    /// Script dropping the delete change-capture trigger.
    #[serde(default)]
    pub trigger_delete_drop: String,
    /// Parameterised statement applied once per insert record.
    #[serde(default)]
    pub query_insert: String,
    /// Parameterised statement applied once per update record.
    #[serde(default)]
    pub query_update: String,
    /// Parameterised statement applied once per delete record.
    #[serde(default)]
    pub query_delete: String,
    /// Script recreating the insert trigger.
    #[serde(default)]
    pub trigger_insert: String,
    /// Script recreating the update trigger.
    #[serde(default)]
    pub trigger_update: String,
    /// Script recreating the delete trigger.
    #[serde(default)]
    pub trigger_delete: String,
    /// Server-side page size hint. Sent as a number or a numeric string.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub max_package_size: Option<u64>,
}

/// Records of a batch grouped by operation.
///
/// Each record is either a JSON array (bound positionally to the template's
/// parameters) or a JSON object (bound by parameter name).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchRecords {
    /// Records for `QueryInsert`.
    #[serde(default, alias = "Inserts", alias = "insert", alias = "Insert")]
    pub inserts: Vec<Value>,
    /// Records for `QueryUpdate`.
    #[serde(default, alias = "Updates", alias = "update", alias = "Update")]
    pub updates: Vec<Value>,
    /// Records for `QueryDelete`.
    #[serde(default, alias = "Deletes", alias = "delete", alias = "Delete")]
    pub deletes: Vec<Value>,
}

impl BatchRecords {
    /// Total number of records.
    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    /// Returns true when there are no records at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PullBatch {
    /// Creates a batch with no records and no scripts.
    pub fn empty(sync_id: SyncId) -> Self {
        Self {
            sync_id,
            records: None,
            trigger_insert_drop: String::new(),
            trigger_update_drop: String::new(),
            trigger_delete_drop: String::new(),
            query_insert: String::new(),
            query_update: String::new(),
            query_delete: String::new(),
            trigger_insert: String::new(),
            trigger_update: String::new(),
            trigger_delete: String::new(),
            max_package_size: None,
        }
    }

    /// Returns true when the batch has at least one record to apply.
    pub fn has_records(&self) -> bool {
        self.records.as_ref().is_some_and(|r| !r.is_empty())
    }

    /// Number of records in the batch.
    pub fn record_count(&self) -> usize {
        self.records.as_ref().map_or(0, BatchRecords::len)
    }

    /// Trigger drop scripts in insert, update, delete order.
    pub fn trigger_drops(&self) -> [&str; 3] {
        [
            &self.trigger_insert_drop,
            &self.trigger_update_drop,
            &self.trigger_delete_drop,
        ]
    }

    /// Trigger creation scripts in insert, update, delete order.
    pub fn trigger_creates(&self) -> [&str; 3] {
        [&self.trigger_insert, &self.trigger_update, &self.trigger_delete]
    }

    /// Template and records per operation, in apply order. Operations with
    /// no records are left out.
    pub fn operations(&self) -> Vec<(TemplateKind, &str, &[Value])> {
        let Some(records) = &self.records else {
            return Vec::new();
        };
        [
            (TemplateKind::Insert, self.query_insert.as_str(), records.inserts.as_slice()),
            (TemplateKind::Update, self.query_update.as_str(), records.updates.as_slice()),
            (TemplateKind::Delete, self.query_delete.as_str(), records.deletes.as_slice()),
        ]
        .into_iter()
        .filter(|(_, _, rows)| !rows.is_empty())
        .collect()
    }

    /// Checks that every record can be bound and has a template to bind to.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidRecords`] if a record is neither an
    /// array nor an object, or if records exist for an empty template.
    pub fn validate(&self) -> ProtocolResult<()> {
        for (kind, template, rows) in self.operations() {
            if template.trim().is_empty() {
                return Err(ProtocolError::InvalidRecords {
                    sync_id: self.sync_id.to_string(),
                    message: format!("{} records without a {kind} query", rows.len()),
                });
            }
            if let Some(bad) = rows.iter().find(|r| !(r.is_array() || r.is_object())) {
                return Err(ProtocolError::InvalidRecords {
                    sync_id: self.sync_id.to_string(),
                    message: format!("{kind} record is not an array or object: {bad}"),
                });
            }
        }
        Ok(())
    }
}

/// Decodes a compressed pull body into its batches.
///
/// The body is raw DEFLATE; a zlib-wrapped stream is accepted too. The
/// inflated text may hold an array of batches or a single batch object.
///
/// # Errors
///
/// Returns [`ProtocolError::Inflate`], [`ProtocolError::Utf8`] or
/// [`ProtocolError::Json`] for the matching decode stage, and
/// [`ProtocolError::InvalidRecords`] if a batch fails validation.
pub fn decode_pull_response(body: &[u8]) -> ProtocolResult<Vec<PullBatch>> {
    let inflated = inflate(body)?;
    let text = String::from_utf8(inflated)?;

    let batches = match serde_json::from_str::<Value>(&text)? {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<PullBatch>, _>>()?,
        Value::Null => Vec::new(),
        single => vec![serde_json::from_value(single)?],
    };

    for batch in &batches {
        batch.validate()?;
    }
    Ok(batches)
}

fn inflate(body: &[u8]) -> ProtocolResult<Vec<u8>> {
    let (first, second) = if looks_like_zlib(body) {
        (inflate_zlib(body), inflate_raw as fn(&[u8]) -> std::io::Result<Vec<u8>>)
    } else {
        (inflate_raw(body), inflate_zlib as fn(&[u8]) -> std::io::Result<Vec<u8>>)
    };

    match first {
        Ok(bytes) => Ok(bytes),
        Err(primary) => second(body).map_err(|_| ProtocolError::Inflate(primary)),
    }
}

fn looks_like_zlib(body: &[u8]) -> bool {
    match body {
        [cmf, flg, ..] => cmf & 0x0f == 8 && ((u16::from(*cmf) << 8) | u16::from(*flg)) % 31 == 0,
        _ => false,
    }
}

fn inflate_raw(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    DeflateDecoder::new(body).read_to_end(&mut out)?;
    Ok(out)
}

fn inflate_zlib(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(body).read_to_end(&mut out)?;
    Ok(out)
}

/// `Records` may arrive as an object, as null, or as JSON text.
fn records_from_wire<'de, D>(deserializer: D) -> Result<Option<BatchRecords>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(text) if text.trim().is_empty() => Ok(None),
        Value::String(text) => serde_json::from_str(&text).map(Some).map_err(de::Error::custom),
        other => serde_json::from_value(other).map(Some).map_err(de::Error::custom),
    }
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid package size: {n}"))),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("invalid package size: {s}"))),
        other => Err(de::Error::custom(format!("invalid package size: {other}"))),
    }
}
