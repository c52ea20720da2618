//! Netskope collector against a mock tenant: v1 and v2 wire shapes, cursor
//! persistence on fetch and read-only previews.

use chrono::Utc;
use intake_connectors::cloud::{ApiVersion, NetskopeConfig, NetskopeConnector};
use intake_connectors::testing::{test_connector_config, test_context};
use intake_connectors::{Integration, RawArgs, SecureString};
use intake_core::StateStore;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer, version: ApiVersion) -> NetskopeConfig {
    NetskopeConfig {
        connector: test_connector_config("netskope", &server.uri()),
        api_token: SecureString::from("tok"),
        api_version: version,
        first_fetch: "1 day".to_string(),
        max_fetch: 100,
        vendor: "netskope".to_string(),
        product: "netskope".to_string(),
    }
}

fn alerts() -> Vec<Value> {
    let now = Utc::now().timestamp();
    vec![
        json!({"_id": "a1", "timestamp": now - 600, "type": "alert", "app": "Box"}),
        json!({"_id": "a2", "timestamp": now - 300, "type": "alert", "app": "Slack"}),
    ]
}

// =============================================================================
// API v2
// =============================================================================

async fn mount_v2(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v2/events/data/alert"))
        .and(header("Netskope-Api-Token", "tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": 1, "result": alerts()})))
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/api/v2/events/data/\w+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": 1, "result": []})))
        .with_priority(5)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_v2_fetch_delivers_and_persists_cursor() {
    let server = MockServer::start().await;
    mount_v2(&server).await;

    let ctx = test_context("netskope");
    let connector = NetskopeConnector::new(config(&server, ApiVersion::V2), ctx.context.clone())
        .unwrap();

    let summary = connector.fetch().await.unwrap();
    assert_eq!(summary.delivered, 2);
    assert!(summary.failure_message().is_none());

    let events = ctx.sink.events().await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].payload["source_log_event"], "alert");
    assert!(events[0].payload["_time"].as_str().unwrap().ends_with('Z'));

    let batches = ctx.sink.batches().await;
    assert_eq!(batches[0].vendor, "netskope");

    assert!(ctx.store.get("cursor:netskope").await.unwrap().is_some());

    // Same server data again: everything at or before the watermark was seen.
    let again = connector.fetch().await.unwrap();
    assert_eq!(again.delivered, 0);
    assert_eq!(ctx.sink.events().await.len(), 2);
}

#[tokio::test]
async fn test_v2_preview_does_not_move_cursor() {
    let server = MockServer::start().await;
    mount_v2(&server).await;

    let ctx = test_context("netskope");
    let connector = NetskopeConnector::new(config(&server, ApiVersion::V2), ctx.context.clone())
        .unwrap();

    let args = RawArgs::new()
        .with("limit", "10")
        .with("should_push_events", "false");
    let output = connector.execute("netskope-get-events", &args).await.unwrap();

    assert_eq!(output.prefix.as_deref(), Some("Netskope.Event"));
    assert_eq!(output.outputs.as_array().unwrap().len(), 2);
    assert!(output.readable.starts_with("Events List:"));
    assert!(ctx.store.is_empty().await);
    assert!(ctx.sink.events().await.is_empty());
}

#[tokio::test]
async fn test_v2_preview_can_push() {
    let server = MockServer::start().await;
    mount_v2(&server).await;

    let ctx = test_context("netskope");
    let connector = NetskopeConnector::new(config(&server, ApiVersion::V2), ctx.context.clone())
        .unwrap();

    connector
        .execute("netskope-get-events", &RawArgs::new())
        .await
        .unwrap();

    assert_eq!(ctx.sink.events().await.len(), 2);
    assert!(ctx.store.is_empty().await);
}

// =============================================================================
// API v1
// =============================================================================

#[tokio::test]
async fn test_v1_sends_token_query_and_json_window() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/alerts"))
        .and(query_param("token", "tok"))
        .and(body_partial_json(json!({"limit": 100})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "success", "data": alerts()})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/events"))
        .and(query_param("token", "tok"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "error", "errors": ["x"]})),
        )
        .expect(4)
        .mount(&server)
        .await;

    let ctx = test_context("netskope-v1");
    let connector = NetskopeConnector::new(config(&server, ApiVersion::V1), ctx.context.clone())
        .unwrap();

    let summary = connector.fetch().await.unwrap();
    assert_eq!(summary.delivered, 2);
    let report = summary.report.unwrap();
    assert_eq!(report.streams.len(), 5);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_v1_preview_defaults_to_twenty_per_type() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/alerts"))
        .and(body_partial_json(json!({"limit": 20})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "success", "data": alerts()})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/events"))
        .and(body_partial_json(json!({"limit": 20})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "success", "data": []})),
        )
        .expect(4)
        .mount(&server)
        .await;

    let ctx = test_context("netskope-v1");
    let connector = NetskopeConnector::new(config(&server, ApiVersion::V1), ctx.context.clone())
        .unwrap();

    let args = RawArgs::new().with("should_push_events", "false");
    let output = connector.execute("netskope-get-events", &args).await.unwrap();
    assert_eq!(output.outputs.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_server_error_fails_stream_without_cursor_write() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/api/v2/events/data/\w+$"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "bad window"})))
        .mount(&server)
        .await;

    let ctx = test_context("netskope");
    let connector = NetskopeConnector::new(config(&server, ApiVersion::V2), ctx.context.clone())
        .unwrap();

    let summary = connector.fetch().await.unwrap();
    assert_eq!(summary.delivered, 0);
    assert!(summary.failure_message().is_some());
    assert!(ctx.store.get("cursor:netskope").await.unwrap().is_none());
}
