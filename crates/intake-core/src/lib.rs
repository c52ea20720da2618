//! # intake-core
//!
//! Incremental fetch cursor protocol for vendor event collection.
//!
//! This crate provides the cursor model, the dedup/advance filter, the
//! per-stream fetch loop, the binary-search seek and the collector that ties
//! them to a persisted state store and an ingestion sink.

pub mod collector;
pub mod cursor;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod mock;
pub mod record;
pub mod seek;
pub mod sink;
pub mod store;
pub mod timestamp;

pub use collector::{
    Collector, CollectorConfig, CycleReport, StreamOutcome, StreamReport,
};
pub use cursor::{Cursor, StreamCursor};
pub use error::{
    CollectorError, CollectorResult, FetchError, FetchResult, MalformedRecordError, SinkError,
    SinkResult, StoreError, StoreResult, TimeParseError,
};
pub use fetch::{FetchLoop, PageFetcher, StreamRun, Termination};
pub use filter::{advance, advance_with_limit, pass_dropped, Advance};
pub use record::{OutputEvent, Page, Record, RecordSchema, StreamId};
pub use seek::{seek, TimeProbe};
pub use sink::{EventSink, MemorySink};
pub use store::{
    load_state, save_state, CursorStore, FileStateStore, MemoryStateStore, StateStore,
};
pub use timestamp::{parse_first_fetch, Timestamp};
