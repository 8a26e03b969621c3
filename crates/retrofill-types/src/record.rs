//! Source and derived record types.
//!
//! A [`SourceRecord`] is what a `RecordSource` hands to the engine; a
//! [`DerivedRecord`] is the small projection the engine writes to the
//! destination collection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cursor::Cursor;

/// Field path that resolves to the record identifier instead of a body field.
pub const ID_PATH: &str = "$id";

/// Field path that resolves to the record's ordering key.
pub const ORDER_KEY_PATH: &str = "$order_key";

/// One record read from the source collection. Immutable once read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Store-assigned identifier, unique within the collection.
    pub id: String,
    /// Value of the declared sort key. Pages are ordered by `(order_key, id)`.
    pub order_key: Value,
    /// Document body.
    pub fields: Map<String, Value>,
}

impl SourceRecord {
    #[must_use]
    pub fn new(id: impl Into<String>, order_key: Value, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            order_key,
            fields,
        }
    }

    /// Resolve a dotted field path (`autopayInfo.cycle`) against the body.
    ///
    /// The pseudo-paths [`ID_PATH`] and [`ORDER_KEY_PATH`] resolve to the
    /// identifier and the ordering key. Returns `None` when any segment is
    /// absent or a non-object is traversed.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<Value> {
        match path {
            ID_PATH => Some(Value::String(self.id.clone())),
            ORDER_KEY_PATH => Some(self.order_key.clone()),
            _ => lookup_path(&self.fields, path).cloned(),
        }
    }

    /// Cursor pointing just past this record.
    #[must_use]
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.order_key.clone(), self.id.clone())
    }
}

/// Walk a dotted path through nested JSON objects.
#[must_use]
pub fn lookup_path<'a>(fields: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = fields.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Record written to the destination: a fixed projection of an accepted
/// source record, never the full body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedRecord {
    /// Id of the source record this was derived from (diagnostics only).
    pub source_id: String,
    /// Dedup key the filter accepted it under (diagnostics only).
    pub dedup_key: String,
    /// Output fields, the only part persisted by the destination.
    pub fields: Map<String, Value>,
}

/// One bounded batch of records plus the cursor to continue from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub records: Vec<SourceRecord>,
    /// `None` only at end of data.
    pub next_cursor: Option<Cursor>,
}

impl Page {
    /// Build a page whose continuation cursor is taken from its last record.
    #[must_use]
    pub fn from_records(records: Vec<SourceRecord>) -> Self {
        let next_cursor = records.last().map(SourceRecord::cursor);
        Self {
            records,
            next_cursor,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
