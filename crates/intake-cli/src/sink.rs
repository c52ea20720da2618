//! JSON-lines event sink.

use crate::config::SinkConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use intake_core::{EventSink, OutputEvent, SinkError, SinkResult};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;
use tracing::debug;

/// Writes one JSON object per event.
pub struct JsonLinesSink {
    writer: Mutex<Box<dyn Write + Send>>,
    vendor: Option<String>,
    product: Option<String>,
}

impl JsonLinesSink {
    pub fn new(writer: impl Write + Send + 'static, config: &SinkConfig) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
            vendor: config.vendor.clone(),
            product: config.product.clone(),
        }
    }

    /// Opens the configured file for appending, or stdout.
    pub fn open(config: &SinkConfig) -> Result<Self> {
        match &config.path {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open event file: {}", path.display()))?;
                Ok(Self::new(file, config))
            }
            None => Ok(Self::new(std::io::stdout(), config)),
        }
    }
}

#[async_trait]
impl EventSink for JsonLinesSink {
    async fn send(&self, vendor: &str, product: &str, events: &[OutputEvent]) -> SinkResult<()> {
        let vendor = self.vendor.as_deref().unwrap_or(vendor);
        let product = self.product.as_deref().unwrap_or(product);

        let mut buf = Vec::new();
        for event in events {
            let line = json!({
                "vendor": vendor,
                "product": product,
                "stream": event.stream.as_str(),
                "id": event.id,
                "time": event.time.to_datestring(),
                "event": event.payload,
            });
            serde_json::to_writer(&mut buf, &line).map_err(|e| SinkError::Rejected(e.to_string()))?;
            buf.push(b'\n');
        }

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| SinkError::Io("event writer lock poisoned".to_string()))?;
        writer
            .write_all(&buf)
            .and_then(|_| writer.flush())
            .map_err(|e| SinkError::Io(e.to_string()))?;

        debug!(vendor, product, count = events.len(), "Wrote events");
        Ok(())
    }
}
