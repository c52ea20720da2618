//! Page fetching and the per-stream fetch loop.

use crate::cursor::StreamCursor;
use crate::error::{FetchError, FetchResult};
use crate::filter::{advance_with_limit, pass_dropped};
use crate::record::{OutputEvent, Page, Record, RecordSchema, StreamId};
use crate::timestamp::Timestamp;
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

/// A vendor data source that can be polled one bounded page at a time.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Largest page the vendor will return for a single request.
    fn page_size_ceiling(&self) -> usize;

    /// Where the vendor keeps record IDs and times for this stream.
    fn record_schema(&self, stream: &StreamId) -> RecordSchema;

    /// Fetches up to `page_size` records at or after `watermark`.
    ///
    /// Implementations must not assume callers rely on server ordering.
    async fn fetch_page(
        &self,
        stream: &StreamId,
        watermark: Timestamp,
        page_size: usize,
    ) -> FetchResult<Page>;

    /// Turns a new record into the event handed to the sink.
    fn enrich(&self, stream: &StreamId, record: Record) -> OutputEvent {
        OutputEvent::from_record(stream, record)
    }
}

/// Why a fetch loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The per-cycle record budget was reached.
    BudgetReached,
    /// The vendor returned a short page.
    Exhausted,
    /// A full page yielded nothing new: more records share the watermark than
    /// fit in one page. When malformed records pinned the page, the cursor has
    /// already been moved to the next second.
    Stalled,
    /// A fetch failed; see [`StreamRun::error`].
    Failed,
}

/// Outcome of draining one stream.
#[derive(Debug, Clone)]
pub struct StreamRun {
    /// Stream that was drained.
    pub stream: StreamId,
    /// Events accumulated from fully processed pages.
    pub events: Vec<OutputEvent>,
    /// Cursor as of the last successfully advanced page.
    pub cursor: StreamCursor,
    /// Number of pages fetched successfully.
    pub pages: usize,
    /// Records dropped because they lacked an ID or timestamp.
    pub malformed: usize,
    /// Why the loop stopped.
    pub termination: Termination,
    /// The fetch error that aborted the loop, if any.
    pub error: Option<FetchError>,
}

/// Repeatedly fetches and filters pages for a single stream.
pub struct FetchLoop<'a, F: PageFetcher + ?Sized> {
    fetcher: &'a F,
    max_records: usize,
}

impl<'a, F: PageFetcher + ?Sized> FetchLoop<'a, F> {
    pub fn new(fetcher: &'a F, max_records: usize) -> Self {
        Self {
            fetcher,
            max_records,
        }
    }

    /// Drains `stream` starting from `cursor`.
    ///
    /// Never returns an error directly: a failed fetch ends the loop and is
    /// reported in [`StreamRun::error`] alongside the events and cursor of the
    /// pages processed before it.
    #[instrument(skip(self, cursor), fields(max_records = self.max_records))]
    pub async fn run(&self, stream: &StreamId, cursor: StreamCursor) -> StreamRun {
        let schema = self.fetcher.record_schema(stream);
        let ceiling = self.fetcher.page_size_ceiling().max(1);

        let mut run = StreamRun {
            stream: stream.clone(),
            events: Vec::new(),
            cursor,
            pages: 0,
            malformed: 0,
            termination: Termination::BudgetReached,
            error: None,
        };

        // Dropped records from the last page that a fetch at the current
        // watermark will return again.
        let mut pending_dropped = 0usize;

        loop {
            let remaining = self.max_records.saturating_sub(run.events.len());
            if remaining == 0 {
                run.termination = Termination::BudgetReached;
                break;
            }
            // Records at the watermark that were already emitted come back on an
            // inclusive fetch; ask for them on top of the remaining budget.
            let overlap = run.cursor.seen_ids_at_watermark.len() + pending_dropped;
            let requested = remaining.saturating_add(overlap).min(ceiling);

            let page = match self
                .fetcher
                .fetch_page(stream, run.cursor.watermark, requested)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, pages = run.pages, "Fetch failed, stopping stream");
                    run.termination = Termination::Failed;
                    run.error = Some(e);
                    break;
                }
            };
            run.pages += 1;
            metrics::counter!("intake_pages_fetched_total", "stream" => stream.to_string())
                .increment(1);

            let returned = page.len();
            let mut records = Vec::with_capacity(returned);
            let mut dropped_times = Vec::new();
            let mut untimed = 0usize;
            for raw in page.records {
                let time = raw.get(&schema.timestamp_field).and_then(Timestamp::from_value);
                match Record::from_value(raw, &schema) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        warn!(error = %e, "Dropping malformed record");
                        run.malformed += 1;
                        metrics::counter!(
                            "intake_malformed_records_total",
                            "stream" => stream.to_string()
                        )
                        .increment(1);
                        match time {
                            Some(t) => dropped_times.push(t),
                            None => untimed += 1,
                        }
                    }
                }
            }

            let before = run.cursor.clone();
            let advanced = pass_dropped(
                advance_with_limit(&run.cursor, records, remaining),
                &dropped_times,
                remaining,
            );
            let new_count = advanced.new_records.len();
            debug!(
                returned,
                new = new_count,
                dropped = dropped_times.len() + untimed,
                watermark = %advanced.cursor.watermark,
                "Processed page"
            );

            run.events.extend(
                advanced
                    .new_records
                    .into_iter()
                    .map(|r| self.fetcher.enrich(stream, r)),
            );
            run.cursor = advanced.cursor;

            let dropped_at_watermark = dropped_times
                .iter()
                .filter(|t| **t == run.cursor.watermark)
                .count();
            pending_dropped = dropped_at_watermark + untimed;

            if run.events.len() >= self.max_records {
                run.termination = Termination::BudgetReached;
                break;
            }
            if returned < requested {
                run.termination = Termination::Exhausted;
                break;
            }
            if new_count > 0 || run.cursor != before {
                continue;
            }

            // Nothing moved. A larger request may still reach past the records
            // that keep coming back; otherwise the page is stuck.
            let next = remaining
                .saturating_add(run.cursor.seen_ids_at_watermark.len() + pending_dropped)
                .min(ceiling);
            if next > requested {
                continue;
            }
            run.termination = Termination::Stalled;
            if dropped_at_watermark > 0 {
                if let Some(next_second) = run.cursor.watermark.next_second() {
                    warn!(
                        watermark = %run.cursor.watermark,
                        dropped = dropped_at_watermark,
                        page_size = requested,
                        "Full page pinned by malformed records, skipping to the next second"
                    );
                    run.cursor = StreamCursor::cold_start(next_second);
                    break;
                }
            }
            warn!(
                watermark = %run.cursor.watermark,
                page_size = requested,
                "Full page contained no new records, stopping to avoid refetching it"
            );
            break;
        }

        run
    }
}
