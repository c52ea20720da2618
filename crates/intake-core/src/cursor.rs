//! Persisted polling positions.
//!
//! A [`StreamCursor`] is the watermark plus the tie-breaking ID set for one
//! stream. Everything strictly older than the watermark has been emitted;
//! records exactly at the watermark were emitted iff their ID is in the set.

use crate::record::StreamId;
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Position of a single stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCursor {
    /// Lower time bound (inclusive) for the next fetch.
    pub watermark: Timestamp,
    /// IDs already emitted whose timestamp equals `watermark`.
    #[serde(default)]
    pub seen_ids_at_watermark: BTreeSet<String>,
}

impl StreamCursor {
    pub fn new(watermark: Timestamp, seen_ids_at_watermark: BTreeSet<String>) -> Self {
        Self {
            watermark,
            seen_ids_at_watermark,
        }
    }

    /// The cursor of a stream that has never been fetched.
    pub fn cold_start(first_fetch: Timestamp) -> Self {
        Self::new(first_fetch, BTreeSet::new())
    }

    /// Whether a record with this time and ID was emitted in a previous cycle.
    pub fn has_emitted(&self, timestamp: Timestamp, id: &str) -> bool {
        timestamp < self.watermark
            || (timestamp == self.watermark && self.seen_ids_at_watermark.contains(id))
    }
}

/// Positions of every stream of one integration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor {
    streams: BTreeMap<StreamId, StreamCursor>,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stream: &StreamId) -> Option<&StreamCursor> {
        self.streams.get(stream)
    }

    /// Returns the stored cursor, or a cold-start cursor at `first_fetch`.
    pub fn get_or_cold_start(&self, stream: &StreamId, first_fetch: Timestamp) -> StreamCursor {
        self.streams
            .get(stream)
            .cloned()
            .unwrap_or_else(|| StreamCursor::cold_start(first_fetch))
    }

    pub fn set(&mut self, stream: StreamId, cursor: StreamCursor) {
        self.streams.insert(stream, cursor);
    }

    pub fn streams(&self) -> impl Iterator<Item = (&StreamId, &StreamCursor)> {
        self.streams.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
