//! IRONSCALES collector against a mock service: JWT exchange, the first-run
//! seek over open incidents and one event per incident report.

use chrono::{Duration, SecondsFormat, Utc};
use intake_connectors::email::{IronscalesConfig, IronscalesConnector, IronscalesState};
use intake_connectors::testing::{test_connector_config, test_context};
use intake_connectors::{ConnectorError, Integration, RawArgs, SecureString};
use intake_core::load_state;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn hours_ago(hours: i64) -> String {
    (Utc::now() - Duration::hours(hours)).to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn config(server: &MockServer) -> IronscalesConfig {
    IronscalesConfig {
        connector: test_connector_config("ironscales", &server.uri()),
        company_id: "acme".to_string(),
        api_key: SecureString::from("key-1"),
        scopes: vec!["company.all".to_string()],
        first_fetch: "3 days".to_string(),
        max_fetch: 1000,
        fetch_ids: Vec::new(),
    }
}

async fn mount_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/appapi/get-token/"))
        .and(body_partial_json(json!({"key": "key-1", "scopes": ["company.all"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jwt": "J"})))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_incident(server: &MockServer, id: i64, first_reported: &str, reports: usize) {
    let reports: Vec<_> = (0..reports)
        .map(|n| json!({"name": format!("reporter-{}", n), "email": "r@example.com"}))
        .collect();
    Mock::given(method("GET"))
        .and(path(format!("/appapi/incident/acme/details/{}", id)))
        .and(header("Authorization", "JWT J"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "incident_id": id,
            "classification": "Phishing",
            "first_reported_date": first_reported,
            "reports": reports,
        })))
        .mount(server)
        .await;
}

// =============================================================================
// Fetch
// =============================================================================

#[tokio::test]
async fn test_first_fetch_seeks_and_emits_one_event_per_report() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/appapi/incident/acme/open/"))
        .and(header("Authorization", "JWT J"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"incident_ids": [3, 1, 2]})),
        )
        .mount(&server)
        .await;

    mount_incident(&server, 1, &hours_ago(24 * 10), 1).await;
    mount_incident(&server, 2, &hours_ago(2), 2).await;
    mount_incident(&server, 3, &hours_ago(1), 1).await;

    let ctx = test_context("ironscales");
    let connector = IronscalesConnector::new(config(&server), ctx.context.clone()).unwrap();

    let summary = connector.fetch().await.unwrap();
    assert_eq!(summary.delivered, 3);

    let events = ctx.sink.events().await;
    let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["2-0", "2-1", "3-0"]);
    assert!(events.iter().all(|e| e.payload.get("reports").is_none()));
    assert_eq!(events[1].payload["name"], "reporter-1");
    assert_eq!(events[0].payload["classification"], "Phishing");
    assert_eq!(events[0].payload["_time"], events[0].payload["first_reported_date"]);

    let state: IronscalesState = load_state(ctx.store.as_ref(), "last_run:ironscales")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.last_id, Some(3));

    // Nothing newer than last_id on the next cycle, and the JWT is reused.
    let again = connector.fetch().await.unwrap();
    assert_eq!(again.delivered, 0);
}

#[tokio::test]
async fn test_fetch_ids_bypass_seek_and_open_list() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/appapi/incident/acme/open/"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    // Old enough that a seek would have skipped it.
    mount_incident(&server, 7, &hours_ago(24 * 30), 1).await;

    let ctx = test_context("ironscales");
    let mut cfg = config(&server);
    cfg.fetch_ids = vec![7];
    let connector = IronscalesConnector::new(cfg, ctx.context.clone()).unwrap();

    let summary = connector.fetch().await.unwrap();
    assert_eq!(summary.delivered, 1);
}

#[tokio::test]
async fn test_failed_lookup_persists_nothing() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/appapi/incident/acme/details/9"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "gone"})))
        .mount(&server)
        .await;

    let ctx = test_context("ironscales");
    let mut cfg = config(&server);
    cfg.fetch_ids = vec![9];
    let connector = IronscalesConnector::new(cfg, ctx.context.clone()).unwrap();

    assert!(matches!(
        connector.fetch().await,
        Err(ConnectorError::NotFound(_))
    ));
    assert!(ctx.sink.events().await.is_empty());
    assert!(load_state::<IronscalesState>(ctx.store.as_ref(), "last_run:ironscales")
        .await
        .unwrap()
        .is_none());
}

// =============================================================================
// Auth
// =============================================================================

#[tokio::test]
async fn test_rejected_api_key() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/appapi/get-token/"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let ctx = test_context("ironscales");
    let connector = IronscalesConnector::new(config(&server), ctx.context).unwrap();

    match connector.execute("ironscales-get-events", &RawArgs::new()).await {
        Err(ConnectorError::AuthenticationFailed(msg)) => {
            assert_eq!(msg, "Authorization Error: make sure API Key is correctly set")
        }
        other => panic!("Expected AuthenticationFailed, got {:?}", other.map(|o| o.readable)),
    }
}
