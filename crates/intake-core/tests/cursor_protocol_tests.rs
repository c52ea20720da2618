//! End-to-end tests of the fetch cursor protocol: collector, fetch loop,
//! filter and state store working together against the mock vendor.

use intake_core::mock::{MockBehavior, MockPageFetcher};
use intake_core::{
    advance, Collector, CollectorConfig, CursorStore, FetchError, FileStateStore, MemorySink,
    MemoryStateStore, Record, StateStore, StreamCursor, StreamId, StreamOutcome, Termination,
    Timestamp,
};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

fn ts(secs: i64) -> Timestamp {
    Timestamp::from_epoch_secs(secs).unwrap()
}

fn config(first_fetch: i64, max: usize) -> CollectorConfig {
    CollectorConfig {
        vendor: "acme".to_string(),
        product: "casb".to_string(),
        first_fetch: ts(first_fetch),
        max_records_per_stream: max,
    }
}

fn sequential(prefix: &str, n: usize, start: i64) -> Vec<Value> {
    (0..n)
        .map(|i| json!({"id": format!("{}-{}", prefix, i), "timestamp": start + i as i64}))
        .collect()
}

struct Harness {
    fetcher: Arc<MockPageFetcher>,
    store: Arc<dyn StateStore>,
    sink: Arc<MemorySink>,
    collector: Collector,
}

fn harness(fetcher: MockPageFetcher, store: Arc<dyn StateStore>, config: CollectorConfig) -> Harness {
    let fetcher = Arc::new(fetcher);
    let sink = Arc::new(MemorySink::new());
    let collector = Collector::new(
        fetcher.clone(),
        CursorStore::new(store.clone(), "acme"),
        sink.clone(),
        config,
    );
    Harness {
        fetcher,
        store,
        sink,
        collector,
    }
}

async fn emitted_ids(sink: &MemorySink) -> Vec<String> {
    sink.events().await.into_iter().map(|e| e.id).collect()
}

#[tokio::test]
async fn test_cold_start_uses_first_fetch_time() {
    let stream = StreamId::from("alert");
    let fetcher = MockPageFetcher::new(50).with_records(&stream, sequential("a", 10, 100));
    let h = harness(fetcher, Arc::new(MemoryStateStore::new()), config(105, 100));

    h.collector.run_cycle(&[stream.clone()]).await.unwrap();

    assert_eq!(
        emitted_ids(&h.sink).await,
        vec!["a-5", "a-6", "a-7", "a-8", "a-9"]
    );
    let cursor = CursorStore::new(h.store.clone(), "acme").load().await.unwrap();
    assert_eq!(
        cursor.get(&stream),
        Some(&StreamCursor::new(ts(109), BTreeSet::from(["a-9".to_string()])))
    );
}

#[tokio::test]
async fn test_exact_watermark_tie_across_cycles() {
    let stream = StreamId::from("audit");
    let fetcher = MockPageFetcher::new(10).with_records(
        &stream,
        vec![json!({"id": "a", "timestamp": 1000})],
    );
    let h = harness(fetcher, Arc::new(MemoryStateStore::new()), config(0, 100));

    h.collector.run_cycle(&[stream.clone()]).await.unwrap();
    assert_eq!(emitted_ids(&h.sink).await, vec!["a"]);

    // "b" arrives late with the same timestamp as "a", plus a newer "c".
    h.fetcher
        .push_records(
            &stream,
            vec![
                json!({"id": "b", "timestamp": 1000}),
                json!({"id": "c", "timestamp": 1001}),
            ],
        )
        .await;
    h.collector.run_cycle(&[stream.clone()]).await.unwrap();

    assert_eq!(emitted_ids(&h.sink).await, vec!["a", "b", "c"]);
    let cursor = CursorStore::new(h.store.clone(), "acme").load().await.unwrap();
    assert_eq!(
        cursor.get(&stream),
        Some(&StreamCursor::new(ts(1001), BTreeSet::from(["c".to_string()])))
    );
}

#[tokio::test]
async fn test_short_page_terminates_regardless_of_budget() {
    let stream = StreamId::from("network");
    let fetcher = MockPageFetcher::new(100).with_records(&stream, sequential("n", 37, 0));
    let h = harness(fetcher, Arc::new(MemoryStateStore::new()), config(0, 10_000));

    let report = h.collector.run_cycle(&[stream]).await.unwrap();

    assert_eq!(h.fetcher.requests().await, vec![100]);
    assert_eq!(
        report.streams[0].outcome,
        StreamOutcome::Completed(Termination::Exhausted)
    );
    assert_eq!(report.emitted(), 37);
}

#[tokio::test]
async fn test_transient_failure_delivers_partial_and_resumes() {
    let stream = StreamId::from("application");
    let fetcher = MockPageFetcher::new(10)
        .with_records(&stream, sequential("p", 25, 0))
        .with_behavior(MockBehavior::FailOnCall {
            call: 1,
            error: FetchError::Transient("504 Gateway Timeout".into()),
        });
    let h = harness(fetcher, Arc::new(MemoryStateStore::new()), config(0, 1000));

    let report = h.collector.run_cycle(&[stream.clone()]).await.unwrap();
    assert!(matches!(report.streams[0].outcome, StreamOutcome::Partial(_)));
    assert_eq!(report.emitted(), 10);
    assert!(report.into_result().is_err());

    let report = h.collector.run_cycle(&[stream]).await.unwrap();
    assert!(report.is_success());

    let ids = emitted_ids(&h.sink).await;
    let expected: Vec<String> = (0..25).map(|i| format!("p-{}", i)).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_fatal_failure_discards_and_keeps_cursor() {
    let stream = StreamId::from("page");
    let fetcher = MockPageFetcher::new(10)
        .with_records(&stream, sequential("g", 25, 0))
        .with_behavior(MockBehavior::FailOnCall {
            call: 1,
            error: FetchError::Fatal("401 Unauthorized".into()),
        });
    let store = Arc::new(MemoryStateStore::new());
    let h = harness(fetcher, store.clone(), config(0, 1000));

    let report = h.collector.run_cycle(&[stream.clone()]).await.unwrap();
    assert!(matches!(report.streams[0].outcome, StreamOutcome::Failed(_)));
    assert!(h.sink.events().await.is_empty());
    assert!(store.is_empty().await);

    h.collector.run_cycle(&[stream]).await.unwrap();
    assert_eq!(h.sink.events().await.len(), 25);
}

#[tokio::test]
async fn test_connection_failure_skips_remaining_streams() {
    let alert = StreamId::from("alert");
    let audit = StreamId::from("audit");
    let page = StreamId::from("page");
    let fetcher = MockPageFetcher::new(10)
        .with_records(&alert, sequential("a", 3, 0))
        .with_records(&audit, sequential("u", 3, 0))
        .with_records(&page, sequential("p", 3, 0))
        .with_behavior(MockBehavior::FailStream {
            stream: audit.clone(),
            error: FetchError::Connection("connection refused".into()),
        });
    let h = harness(fetcher, Arc::new(MemoryStateStore::new()), config(0, 100));

    let report = h
        .collector
        .run_cycle(&[alert.clone(), audit.clone(), page.clone()])
        .await
        .unwrap();

    assert!(report.streams[0].outcome.is_success());
    assert!(matches!(report.streams[1].outcome, StreamOutcome::Failed(_)));
    assert_eq!(report.streams[2].outcome, StreamOutcome::Skipped);

    let cursor = CursorStore::new(h.store.clone(), "acme").load().await.unwrap();
    assert!(cursor.get(&alert).is_some());
    assert!(cursor.get(&audit).is_none());
    assert!(cursor.get(&page).is_none());

    let message = report.failure_message().unwrap();
    assert!(message.contains("audit: Connection failure"));
    assert!(message.contains("page: skipped"));
}

#[tokio::test]
async fn test_malformed_page_does_not_block_later_cycles() {
    let stream = StreamId::from("alert");
    let mut records: Vec<Value> = (0..3).map(|_| json!({"timestamp": 100})).collect();
    records.extend(sequential("v", 4, 101));
    let h = harness(
        MockPageFetcher::new(3).with_records(&stream, records),
        Arc::new(MemoryStateStore::new()),
        config(0, 10),
    );

    let first = h.collector.run_cycle(&[stream.clone()]).await.unwrap();
    assert_eq!(first.streams[0].malformed, 3);
    assert_eq!(
        first.streams[0].outcome,
        StreamOutcome::Completed(Termination::Stalled)
    );

    h.collector.run_cycle(&[stream.clone()]).await.unwrap();
    h.collector.run_cycle(&[stream]).await.unwrap();

    assert_eq!(emitted_ids(&h.sink).await, vec!["v-0", "v-1", "v-2", "v-3"]);
}

#[tokio::test]
async fn test_file_store_resumes_in_new_process() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let stream = StreamId::from("alert");
    let records = sequential("f", 30, 0);

    let first = harness(
        MockPageFetcher::new(10).with_records(&stream, records.clone()),
        Arc::new(FileStateStore::new(&path)),
        config(0, 12),
    );
    first.collector.run_cycle(&[stream.clone()]).await.unwrap();
    assert_eq!(first.sink.events().await.len(), 12);

    let second = harness(
        MockPageFetcher::new(10).with_records(&stream, records),
        Arc::new(FileStateStore::new(&path)),
        config(0, 100),
    );
    second.collector.run_cycle(&[stream]).await.unwrap();

    let ids = emitted_ids(&second.sink).await;
    assert_eq!(ids.len(), 18);
    assert_eq!(ids.first().map(String::as_str), Some("f-12"));
}

/// Timestamps where no more than `max_run` records share a second.
fn timestamps(max_run: usize) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0i64..3, 1..80).prop_map(move |steps| {
        let mut out = Vec::with_capacity(steps.len());
        let mut t = 1_000i64;
        let mut run = 0usize;
        for step in steps {
            let step = if run + 1 >= max_run { step.max(1) } else { step };
            if step == 0 {
                run += 1;
            } else {
                run = 0;
            }
            t += step;
            out.push(t);
        }
        out
    })
}

fn drain(records: Vec<Value>, ceiling: usize, budget: usize) -> Vec<String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async move {
        let stream = StreamId::from("s");
        let total = records.len();
        let h = harness(
            MockPageFetcher::new(ceiling).with_records(&stream, records),
            Arc::new(MemoryStateStore::new()),
            config(0, budget),
        );
        // A cycle can emit nothing yet still move past malformed records, so
        // stop only once the stored cursor settles too.
        let cursors = CursorStore::new(h.store.clone(), "acme");
        for _ in 0..(total + 2) {
            let before = cursors.load().await.unwrap();
            let report = h.collector.run_cycle(&[stream.clone()]).await.unwrap();
            if report.emitted() == 0 && cursors.load().await.unwrap() == before {
                break;
            }
        }
        emitted_ids(&h.sink).await
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_every_record_emitted_exactly_once(
        (ceiling, times) in (3usize..12).prop_flat_map(|c| (Just(c), timestamps(c - 1))),
        missing_id in prop::collection::vec(prop::bool::weighted(0.2), 80),
        budget in 1usize..20,
    ) {
        // Some records lack an ID and must be dropped without holding back the
        // valid records around them.
        let records: Vec<Value> = times
            .iter()
            .enumerate()
            .map(|(i, t)| {
                if missing_id[i] {
                    json!({"timestamp": t})
                } else {
                    json!({"id": format!("r{}", i), "timestamp": t})
                }
            })
            .collect();
        let valid = missing_id.iter().take(times.len()).filter(|m| !**m).count();

        let emitted = drain(records, ceiling, budget);

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for id in &emitted {
            *counts.entry(id.as_str()).or_default() += 1;
        }
        prop_assert_eq!(emitted.len(), valid);
        prop_assert_eq!(counts.len(), valid);
        prop_assert!(counts.values().all(|c| *c == 1));
    }

    #[test]
    fn prop_filter_replay_is_idempotent(
        page in prop::collection::vec((0usize..15, 0i64..10), 0..40),
        watermark in 0i64..10,
        seen in prop::collection::btree_set(0usize..15, 0..5),
    ) {
        let cursor = StreamCursor::new(
            ts(watermark),
            seen.iter().map(|i| format!("id{}", i)).collect(),
        );
        let page: Vec<Record> = page
            .into_iter()
            .map(|(id, t)| Record::new(format!("id{}", id), ts(t), json!({})))
            .collect();

        let first = advance(&cursor, page.clone());
        for record in &first.new_records {
            prop_assert!(!cursor.has_emitted(record.timestamp, &record.id));
        }

        let replay = advance(&first.cursor, page);
        prop_assert!(replay.new_records.is_empty());
        prop_assert_eq!(replay.cursor, first.cursor);
    }
}
