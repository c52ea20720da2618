//! CVE Search against a mock CVE-Search API.

use intake_connectors::testing::test_connector_config;
use intake_connectors::threat_intel::{CveSearchConfig, CveSearchConnector};
use intake_connectors::{Connector, ConnectorError, Integration, RawArgs};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn connector(server: &MockServer) -> CveSearchConnector {
    let mut config = CveSearchConfig::new("cve");
    config.connector = test_connector_config("cve", &format!("{}/api/", server.uri()));
    CveSearchConnector::new(config).unwrap()
}

fn log4shell() -> Value {
    json!({
        "id": "CVE-2021-44228",
        "cvss": 9.3,
        "Published": "2021-12-10T10:15:00Z",
        "Modified": "2022-07-12T17:42:00Z",
        "summary": "Apache Log4j2 JNDI features do not protect against attacker controlled LDAP.",
        "cwe": "CWE-20",
        "references": ["https://logging.apache.org/log4j/2.x/security.html"],
        "vulnerable_product": ["cpe:2.3:a:apache:log4j:2.0:-:*:*:*:*:*:*"]
    })
}

#[tokio::test]
async fn test_cve_lookup_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/cve/CVE-2021-44228"))
        .respond_with(ResponseTemplate::new(200).set_body_json(log4shell()))
        .expect(1)
        .mount(&server)
        .await;

    let connector = connector(&server);
    let args = RawArgs::new().with("cve_id", "CVE-2021-44228");

    let first = connector.execute("cve", &args).await.unwrap();
    let second = connector.execute("cve", &args).await.unwrap();
    assert_eq!(first, second);

    assert_eq!(first.prefix.as_deref(), Some("CVEsearch.CVE"));
    let context = &first.outputs[0];
    assert_eq!(context["ID"], "CVE-2021-44228");
    assert_eq!(context["CVSS"], 9.3);
    assert_eq!(context["Published"], "2021-12-10T10:15:00");

    let indicator = &first.indicators[0];
    assert_eq!(
        indicator["tags"],
        json!(["Apache", "Log4j", "Application", "CWE-20"])
    );
    assert_eq!(indicator["relationships"][1]["entity_b"], "Log4j");
}

#[tokio::test]
async fn test_cve_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/cve/CVE-2099-0001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Null))
        .mount(&server)
        .await;

    let output = connector(&server)
        .execute("cve", &RawArgs::new().with("cve_id", "CVE-2099-0001"))
        .await
        .unwrap();
    assert_eq!(output.readable, "No results found for cve CVE-2099-0001");
    assert!(output.indicators.is_empty());
}

#[tokio::test]
async fn test_invalid_id_is_rejected_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = connector(&server)
        .execute("cve", &RawArgs::new().with("cve_id", "CVE-2021-44228,log4shell"))
        .await;
    assert!(matches!(result, Err(ConnectorError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_cve_latest() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/last/2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([log4shell(), {"id": "CVE-2021-45046", "summary": "Incomplete fix"}])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/last/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let connector = connector(&server);
    let output = connector
        .execute("cve-latest", &RawArgs::new().with("limit", "2"))
        .await
        .unwrap();
    assert_eq!(output.prefix.as_deref(), Some("CVE"));
    assert_eq!(output.outputs.as_array().unwrap().len(), 2);
    assert_eq!(output.outputs[1]["CVSS"], "N\\A");
    assert_eq!(output.indicators.len(), 2);
    assert!(output.readable.starts_with("Latest CVEs"));

    let empty = connector
        .execute("cve-latest", &RawArgs::new().with("limit", "1"))
        .await
        .unwrap();
    assert_eq!(empty.readable, "No results found");
    assert!(connector.test_connection().await.unwrap());
}
