//! Records, pages and output events.

use crate::error::MalformedRecordError;
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifier of one independently pollable category of vendor records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Where a vendor keeps the record identity and time in its JSON objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    /// Field holding the opaque record ID.
    pub id_field: String,
    /// Field holding the record time (epoch seconds or ISO string).
    pub timestamp_field: String,
}

impl RecordSchema {
    pub fn new(id_field: impl Into<String>, timestamp_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            timestamp_field: timestamp_field.into(),
        }
    }
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self::new("id", "timestamp")
    }
}

/// A vendor record with its identity and time extracted.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Opaque ID, unique within its stream.
    pub id: String,
    /// Record time.
    pub timestamp: Timestamp,
    /// The original vendor JSON.
    pub body: Value,
}

impl Record {
    pub fn new(id: impl Into<String>, timestamp: Timestamp, body: Value) -> Self {
        Self {
            id: id.into(),
            timestamp,
            body,
        }
    }

    /// Extracts the ID and timestamp from a raw vendor object.
    pub fn from_value(body: Value, schema: &RecordSchema) -> Result<Self, MalformedRecordError> {
        let id = match body.get(&schema.id_field) {
            Some(Value::String(s)) if s.is_empty() => {
                return Err(MalformedRecordError::new(&schema.id_field, "is empty"))
            }
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(_) => {
                return Err(MalformedRecordError::new(
                    &schema.id_field,
                    "is not a string or number",
                ))
            }
            None => return Err(MalformedRecordError::new(&schema.id_field, "is missing")),
        };

        let timestamp = match body.get(&schema.timestamp_field) {
            Some(raw) => Timestamp::from_value(raw).ok_or_else(|| {
                MalformedRecordError::new(&schema.timestamp_field, format!("is unparsable: {raw}"))
            })?,
            None => {
                return Err(MalformedRecordError::new(
                    &schema.timestamp_field,
                    "is missing",
                ))
            }
        };

        Ok(Self {
            id,
            timestamp,
            body,
        })
    }
}

/// The raw result of one bounded vendor request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Vendor objects in server order. May include malformed entries.
    pub records: Vec<Value>,
}

impl Page {
    pub fn new(records: Vec<Value>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A record after enrichment, ready for the ingestion sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEvent {
    /// Stream the record came from.
    pub stream: StreamId,
    /// Record ID.
    pub id: String,
    /// Canonical event time.
    pub time: Timestamp,
    /// Enriched vendor payload.
    pub payload: Value,
}

impl OutputEvent {
    /// Default enrichment: tags the payload with its stream type and a
    /// canonical `_time` field.
    pub fn from_record(stream: &StreamId, record: Record) -> Self {
        let mut payload = record.body;
        if let Value::Object(map) = &mut payload {
            map.insert(
                "source_log_event".to_string(),
                Value::String(stream.to_string()),
            );
            map.insert(
                "_time".to_string(),
                Value::String(record.timestamp.to_datestring()),
            );
        }
        Self {
            stream: stream.clone(),
            id: record.id,
            time: record.timestamp,
            payload,
        }
    }
}
