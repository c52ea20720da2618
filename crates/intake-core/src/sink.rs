//! Downstream ingestion sink.

use crate::error::{SinkError, SinkResult};
use crate::record::OutputEvent;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Receives output events for ingestion by the host platform.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers one batch of events tagged with their vendor and product.
    async fn send(&self, vendor: &str, product: &str, events: &[OutputEvent]) -> SinkResult<()>;
}

/// A batch captured by [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentBatch {
    pub vendor: String,
    pub product: String,
    pub events: Vec<OutputEvent>,
}

/// Collects batches in memory. Can be switched to reject every batch.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: RwLock<Vec<SentBatch>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent sends fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn batches(&self) -> Vec<SentBatch> {
        self.batches.read().await.clone()
    }

    /// All delivered events, flattened in delivery order.
    pub async fn events(&self) -> Vec<OutputEvent> {
        self.batches
            .read()
            .await
            .iter()
            .flat_map(|b| b.events.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn send(&self, vendor: &str, product: &str, events: &[OutputEvent]) -> SinkResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("memory sink set to fail".to_string()));
        }
        self.batches.write().await.push(SentBatch {
            vendor: vendor.to_string(),
            product: product.to_string(),
            events: events.to_vec(),
        });
        Ok(())
    }
}
