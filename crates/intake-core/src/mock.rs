//! In-memory page fetcher for tests.
//!
//! Serves records per stream with an inclusive time lower bound, ascending by
//! timestamp, and supports failure injection.

use crate::error::{FetchError, FetchResult};
use crate::fetch::PageFetcher;
use crate::record::{Page, RecordSchema, StreamId};
use crate::timestamp::Timestamp;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Behavior configuration for failure injection.
#[derive(Debug, Clone, Default)]
pub enum MockBehavior {
    /// Normal operation.
    #[default]
    Normal,
    /// Succeed for the first `calls` fetches, then fail every fetch.
    FailAfter { calls: usize, error: FetchError },
    /// Fail only the `call`-th fetch (zero based).
    FailOnCall { call: usize, error: FetchError },
    /// Always fail fetches of one stream.
    FailStream { stream: StreamId, error: FetchError },
}

/// Mock vendor serving canned records.
pub struct MockPageFetcher {
    ceiling: usize,
    schema: RecordSchema,
    records: RwLock<HashMap<StreamId, Vec<Value>>>,
    behavior: RwLock<MockBehavior>,
    calls: AtomicUsize,
    requests: RwLock<Vec<usize>>,
}

impl MockPageFetcher {
    /// Creates an empty mock with the given page-size ceiling.
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            schema: RecordSchema::default(),
            records: RwLock::new(HashMap::new()),
            behavior: RwLock::new(MockBehavior::Normal),
            calls: AtomicUsize::new(0),
            requests: RwLock::new(Vec::new()),
        }
    }

    pub fn with_schema(mut self, schema: RecordSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_records(mut self, stream: &StreamId, records: Vec<Value>) -> Self {
        self.records
            .get_mut()
            .entry(stream.clone())
            .or_default()
            .extend(records);
        self
    }

    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        *self.behavior.get_mut() = behavior;
        self
    }

    /// Adds records after construction, e.g. between two cycles.
    pub async fn push_records(&self, stream: &StreamId, records: Vec<Value>) {
        self.records
            .write()
            .await
            .entry(stream.clone())
            .or_default()
            .extend(records);
    }

    pub async fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.write().await = behavior;
    }

    /// Page sizes requested so far, in call order.
    pub async fn requests(&self) -> Vec<usize> {
        self.requests.read().await.clone()
    }

    fn time_of(&self, record: &Value) -> Option<Timestamp> {
        record
            .get(&self.schema.timestamp_field)
            .and_then(Timestamp::from_value)
    }
}

#[async_trait]
impl PageFetcher for MockPageFetcher {
    fn page_size_ceiling(&self) -> usize {
        self.ceiling
    }

    fn record_schema(&self, _stream: &StreamId) -> RecordSchema {
        self.schema.clone()
    }

    async fn fetch_page(
        &self,
        stream: &StreamId,
        watermark: Timestamp,
        page_size: usize,
    ) -> FetchResult<Page> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        match &*self.behavior.read().await {
            MockBehavior::Normal => {}
            MockBehavior::FailAfter { calls, error } if call >= *calls => {
                return Err(error.clone());
            }
            MockBehavior::FailOnCall { call: n, error } if call == *n => {
                return Err(error.clone());
            }
            MockBehavior::FailStream { stream: s, error } if s == stream => {
                return Err(error.clone());
            }
            _ => {}
        }

        self.requests.write().await.push(page_size);

        let records = self.records.read().await;
        let mut matching: Vec<(Option<Timestamp>, &Value)> = records
            .get(stream)
            .map(|all| {
                all.iter()
                    .map(|r| (self.time_of(r), r))
                    .filter(|(t, _)| t.map_or(true, |t| t >= watermark))
                    .collect()
            })
            .unwrap_or_default();
        matching.sort_by_key(|(t, _)| *t);

        if page_size > self.ceiling {
            return Err(FetchError::Fatal(format!(
                "limit {} exceeds maximum {}",
                page_size, self.ceiling
            )));
        }

        Ok(Page::new(
            matching
                .into_iter()
                .take(page_size)
                .map(|(_, r)| r.clone())
                .collect(),
        ))
    }
}
