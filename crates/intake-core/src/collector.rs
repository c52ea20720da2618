//! Collection cycles across the streams of one integration.
//!
//! A cycle reads the stored cursor once, drains each stream with a
//! [`FetchLoop`], hands the new events to the sink and writes each stream's
//! cursor back individually. What gets written depends on how the stream ended:
//!
//! | outcome          | events delivered | cursor written |
//! |------------------|------------------|----------------|
//! | completed        | yes              | yes            |
//! | transient error  | yes (partial)    | yes (last page)|
//! | fatal error      | no               | no             |
//! | sink failure     | no               | no             |

use crate::cursor::StreamCursor;
use crate::error::{CollectorError, CollectorResult, FetchError, FetchResult};
use crate::fetch::{FetchLoop, PageFetcher, StreamRun, Termination};
use crate::record::{OutputEvent, StreamId};
use crate::sink::EventSink;
use crate::store::CursorStore;
use crate::timestamp::Timestamp;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

/// Static settings of a collector.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Vendor name reported to the sink.
    pub vendor: String,
    /// Product name reported to the sink.
    pub product: String,
    /// Watermark of streams that have no stored cursor yet.
    pub first_fetch: Timestamp,
    /// Upper bound on events emitted per stream per cycle.
    pub max_records_per_stream: usize,
}

/// How a single stream fared in a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    /// Drained without error.
    Completed(Termination),
    /// Stopped by a transient error after delivering what it had.
    Partial(FetchError),
    /// Nothing delivered, cursor unchanged.
    Failed(String),
    /// Not attempted because an earlier stream hit a connection failure.
    Skipped,
}

impl StreamOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StreamOutcome::Completed(_))
    }
}

/// Per-stream line of a [`CycleReport`].
#[derive(Debug, Clone, PartialEq)]
pub struct StreamReport {
    pub stream: StreamId,
    pub emitted: usize,
    pub malformed: usize,
    pub pages: usize,
    pub outcome: StreamOutcome,
}

/// Summary of one collection cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub streams: Vec<StreamReport>,
}

impl CycleReport {
    /// Total events handed to the sink.
    pub fn emitted(&self) -> usize {
        self.streams.iter().map(|s| s.emitted).sum()
    }

    /// Whether every stream completed.
    pub fn is_success(&self) -> bool {
        self.streams.iter().all(|s| s.outcome.is_success())
    }

    /// Joins every non-completed stream into one message.
    pub fn failure_message(&self) -> Option<String> {
        let parts: Vec<String> = self
            .streams
            .iter()
            .filter_map(|s| match &s.outcome {
                StreamOutcome::Completed(_) => None,
                StreamOutcome::Partial(e) => {
                    Some(format!("{}: {} (partial, {} delivered)", s.stream, e, s.emitted))
                }
                StreamOutcome::Failed(msg) => Some(format!("{}: {}", s.stream, msg)),
                StreamOutcome::Skipped => Some(format!(
                    "{}: skipped after connection failure",
                    s.stream
                )),
            })
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }

    /// Converts the report into an error carrying the consolidated message if
    /// any stream did not complete.
    pub fn into_result(self) -> CollectorResult<Self> {
        match self.failure_message() {
            None => Ok(self),
            Some(message) => Err(CollectorError::CycleFailed { message }),
        }
    }
}

/// Drives fetch cycles for one integration instance.
pub struct Collector {
    fetcher: Arc<dyn PageFetcher>,
    cursors: CursorStore,
    sink: Arc<dyn EventSink>,
    config: CollectorConfig,
}

impl Collector {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        cursors: CursorStore,
        sink: Arc<dyn EventSink>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            fetcher,
            cursors,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Runs one cycle over `streams`, in order.
    ///
    /// Stream failures are reported in the returned [`CycleReport`]; only state
    /// store failures abort the cycle with an error.
    pub async fn run_cycle(&self, streams: &[StreamId]) -> CollectorResult<CycleReport> {
        let cursor = self.cursors.load().await?;
        let mut report = CycleReport::default();
        let mut connection_lost = false;

        info!(
            vendor = %self.config.vendor,
            streams = streams.len(),
            max_records = self.config.max_records_per_stream,
            "Starting collection cycle"
        );

        for stream in streams {
            if connection_lost {
                warn!(stream = %stream, "Skipping stream after connection failure");
                report.streams.push(StreamReport {
                    stream: stream.clone(),
                    emitted: 0,
                    malformed: 0,
                    pages: 0,
                    outcome: StreamOutcome::Skipped,
                });
                continue;
            }

            let start = cursor.get_or_cold_start(stream, self.config.first_fetch);
            let span = info_span!("stream", stream = %stream);
            let stream_report = self
                .collect_stream(stream, start)
                .instrument(span)
                .await?;

            if let StreamOutcome::Failed(_) = &stream_report.report.outcome {
                metrics::counter!(
                    "intake_stream_failures_total",
                    "stream" => stream.to_string()
                )
                .increment(1);
            }
            connection_lost = stream_report.connection_lost;
            report.streams.push(stream_report.report);
        }

        info!(
            emitted = report.emitted(),
            success = report.is_success(),
            "Collection cycle finished"
        );
        Ok(report)
    }

    async fn collect_stream(
        &self,
        stream: &StreamId,
        start: StreamCursor,
    ) -> CollectorResult<StreamCollection> {
        let run = FetchLoop::new(self.fetcher.as_ref(), self.config.max_records_per_stream)
            .run(stream, start)
            .await;

        let StreamRun {
            events,
            cursor,
            pages,
            malformed,
            termination,
            error,
            ..
        } = run;

        let mut report = StreamReport {
            stream: stream.clone(),
            emitted: 0,
            malformed,
            pages,
            outcome: StreamOutcome::Completed(termination),
        };

        let mut connection_lost = false;
        match error {
            Some(e) if !e.is_transient() => {
                error!(error = %e, discarded = events.len(), "Stream failed, cursor unchanged");
                connection_lost = e.is_connection_level();
                report.outcome = StreamOutcome::Failed(e.to_string());
                return Ok(StreamCollection {
                    report,
                    connection_lost,
                });
            }
            Some(e) => {
                warn!(error = %e, delivered = events.len(), "Stream stopped early");
                report.outcome = StreamOutcome::Partial(e);
            }
            None => {}
        }

        if !events.is_empty() {
            if let Err(e) = self
                .sink
                .send(&self.config.vendor, &self.config.product, &events)
                .await
            {
                error!(error = %e, "Sink rejected events, cursor unchanged");
                report.outcome = StreamOutcome::Failed(e.to_string());
                return Ok(StreamCollection {
                    report,
                    connection_lost,
                });
            }
        }
        report.emitted = events.len();
        metrics::counter!("intake_events_emitted_total", "stream" => stream.to_string())
            .increment(events.len() as u64);

        let lag = (Timestamp::now().epoch_secs() - cursor.watermark.epoch_secs()).max(0);
        metrics::gauge!("intake_cursor_lag_seconds", "stream" => stream.to_string())
            .set(lag as f64);

        self.cursors.save_stream(stream, cursor).await?;
        info!(emitted = report.emitted, pages, "Stream collected");

        Ok(StreamCollection {
            report,
            connection_lost,
        })
    }

    /// Fetches up to `limit` new events of one stream without delivering them
    /// or touching the stored cursor.
    pub async fn preview(&self, stream: &StreamId, limit: usize) -> FetchResult<Vec<OutputEvent>> {
        let cursor = self
            .cursors
            .load()
            .await
            .map_err(|e| FetchError::Fatal(e.to_string()))?;
        let start = cursor.get_or_cold_start(stream, self.config.first_fetch);

        let run = FetchLoop::new(self.fetcher.as_ref(), limit)
            .run(stream, start)
            .await;
        match run.error {
            Some(e) => Err(e),
            None => Ok(run.events),
        }
    }

    /// [`Collector::preview`] over several streams, concatenated in order.
    pub async fn preview_all(
        &self,
        streams: &[StreamId],
        limit: usize,
    ) -> FetchResult<Vec<OutputEvent>> {
        let mut events = Vec::new();
        for stream in streams {
            events.extend(self.preview(stream, limit).await?);
        }
        Ok(events)
    }

    /// Delivers already fetched events, e.g. after a preview.
    pub async fn push(&self, events: &[OutputEvent]) -> CollectorResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        self.sink
            .send(&self.config.vendor, &self.config.product, events)
            .await?;
        Ok(())
    }
}

struct StreamCollection {
    report: StreamReport,
    connection_lost: bool,
}
