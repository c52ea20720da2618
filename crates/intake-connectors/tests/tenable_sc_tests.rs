//! Tenable.sc against a mock server: alert incidents, session login with
//! re-login on 403, API key auth and the query commands.

use chrono::Utc;
use intake_connectors::testing::{test_connector_config, test_context};
use intake_connectors::vulnerability::{TenableScConfig, TenableScConnector};
use intake_connectors::{AuthState, Connector, ConnectorError, Integration, RawArgs, SecureString};
use intake_core::{load_state, StateStore};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn session_config(server: &MockServer) -> TenableScConfig {
    TenableScConfig {
        connector: test_connector_config("tenable", &server.uri()),
        access_key: None,
        secret_key: None,
        username: Some("admin".to_string()),
        password: Some(SecureString::from("pw")),
        first_fetch: "3 days".to_string(),
        max_fetch: 1000,
    }
}

fn envelope(response: Value) -> Value {
    json!({"type": "regular", "response": response, "error_code": 0, "error_msg": ""})
}

async fn mount_login(server: &MockServer, token: u64, session: &str, times: Option<u64>) {
    let mock = Mock::given(method("POST"))
        .and(path("/rest/token"))
        .and(body_partial_json(json!({"username": "admin", "password": "pw"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", format!("TNS_SESSIONID={}; Path=/", session).as_str())
                .set_body_json(envelope(json!({"token": token}))),
        );
    match times {
        Some(n) => mock.up_to_n_times(n).with_priority(1).mount(server).await,
        None => mock.with_priority(2).mount(server).await,
    }
}

fn usable_alerts() -> Value {
    let now = Utc::now().timestamp();
    json!({
        "usable": [
            {"id": "1", "name": "Never fired", "lastTriggered": "0"},
            {"id": "2", "name": "Critical hosts", "lastTriggered": (now - 600).to_string()},
            {"id": "3", "name": "New plugin", "lastTriggered": (now - 60).to_string()},
        ],
        "manageable": []
    })
}

// =============================================================================
// Incidents
// =============================================================================

#[tokio::test]
async fn test_fetch_incidents_from_triggered_alerts() {
    let server = MockServer::start().await;
    mount_login(&server, 111, "s1", None).await;

    Mock::given(method("GET"))
        .and(path("/rest/alert"))
        .and(header("X-SecurityCenter", "111"))
        .and(header("Cookie", "TNS_SESSIONID=s1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(usable_alerts())))
        .mount(&server)
        .await;

    let ctx = test_context("tenable");
    let connector = TenableScConnector::new(session_config(&server), ctx.context.clone()).unwrap();

    let summary = connector.fetch().await.unwrap();
    assert_eq!(summary.delivered, 2);

    let events = ctx.sink.events().await;
    assert_eq!(events[0].payload["name"], "Tenable.sc Alert Triggered - Critical hosts");
    assert_eq!(events[1].payload["name"], "Tenable.sc Alert Triggered - New plugin");
    let raw: Value = serde_json::from_str(events[1].payload["rawJSON"].as_str().unwrap()).unwrap();
    assert_eq!(raw["id"], "3");

    let batches = ctx.sink.batches().await;
    assert_eq!(batches[0].vendor, "tenable");
    assert_eq!(batches[0].product, "tenable.sc");

    // The session is persisted for the next run.
    let auth: AuthState = load_state(ctx.store.as_ref(), "auth:tenable")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(auth.token.expose_secret(), "111");

    let again = connector.fetch().await.unwrap();
    assert_eq!(again.delivered, 0);
}

#[tokio::test]
async fn test_forbidden_response_triggers_single_relogin() {
    let server = MockServer::start().await;
    mount_login(&server, 111, "s1", Some(1)).await;
    mount_login(&server, 222, "s2", None).await;

    Mock::given(method("GET"))
        .and(path("/rest/status"))
        .and(header("X-SecurityCenter", "111"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error_code": 74, "error_msg": "Invalid token"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/status"))
        .and(header("X-SecurityCenter", "222"))
        .and(header("Cookie", "TNS_SESSIONID=s2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "licenseStatus": "Valid",
            "licensedIPs": "512",
            "activeIPs": "100"
        }))))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = test_context("tenable");
    let connector = TenableScConnector::new(session_config(&server), ctx.context.clone()).unwrap();

    let output = connector
        .execute("tenable-sc-get-system-licensing", &RawArgs::new())
        .await
        .unwrap();
    assert_eq!(output.prefix.as_deref(), Some("TenableSC.Status"));
    assert_eq!(output.outputs["License"], "Valid");
    assert_eq!(output.outputs["ActiveIPS"], "100");
}

#[tokio::test]
async fn test_login_retries_with_release_session() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/token"))
        .and(body_partial_json(json!({"releaseSession": "true"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({"token": 333}))))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({"releaseSession": true}))))
        .with_priority(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/status"))
        .and(header("X-SecurityCenter", "333"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .mount(&server)
        .await;

    let ctx = test_context("tenable");
    let connector = TenableScConnector::new(session_config(&server), ctx.context).unwrap();
    assert!(connector.test_connection().await.unwrap());
}

#[tokio::test]
async fn test_close_logs_out_and_forgets_session() {
    let server = MockServer::start().await;
    mount_login(&server, 111, "s1", None).await;

    Mock::given(method("GET"))
        .and(path("/rest/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/token"))
        .and(header("X-SecurityCenter", "111"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = test_context("tenable");
    let connector = TenableScConnector::new(session_config(&server), ctx.context.clone()).unwrap();
    connector.test_connection().await.unwrap();
    connector.close().await.unwrap();

    assert!(ctx.store.get("auth:tenable").await.unwrap().is_none());
}

// =============================================================================
// API keys and commands
// =============================================================================

#[tokio::test]
async fn test_api_keys_and_list_alerts() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/alert"))
        .and(header("x-apikey", "accesskey=ak; secretkey=sk"))
        .and(query_param(
            "fields",
            "id,name,description,didTriggerLastEvaluation,lastTriggered,action,lastEvaluated,ownerGroup,owner",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "usable": [],
            "manageable": [{
                "id": "4",
                "name": "Weekly",
                "didTriggerLastEvaluation": "true",
                "lastTriggered": "1700000000",
                "lastEvaluated": "1700000100",
                "action": [{"type": "email"}, {"type": "ticket"}],
                "ownerGroup": {"name": "Full Access"},
                "owner": {"username": "secman"}
            }]
        }))))
        .mount(&server)
        .await;

    let ctx = test_context("tenable");
    let mut cfg = session_config(&server);
    cfg.access_key = Some(SecureString::from("ak"));
    cfg.secret_key = Some(SecureString::from("sk"));
    let connector = TenableScConnector::new(cfg, ctx.context).unwrap();

    let empty = connector
        .execute("tenable-sc-list-alerts", &RawArgs::new())
        .await
        .unwrap();
    assert_eq!(empty.readable, "No alerts found");

    let output = connector
        .execute(
            "tenable-sc-list-alerts",
            &RawArgs::new().with("manageable", "true"),
        )
        .await
        .unwrap();
    let alert = &output.outputs[0];
    assert_eq!(alert["State"], "Triggered");
    assert_eq!(alert["LastTriggered"], "2023-11-14T22:13:20Z");
    assert_eq!(alert["Actions"], json!(["email", "ticket"]));
    assert_eq!(alert["Group"], "Full Access");
    assert_eq!(alert["Owner"], "secman");
}

#[tokio::test]
async fn test_get_alert_with_query_and_actions() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/alert/4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "id": "4",
            "name": "Weekly",
            "description": "",
            "lastTriggered": "0",
            "didTriggerLastEvaluation": "false",
            "executeOnEveryTrigger": "true",
            "triggerName": "sumip",
            "triggerOperator": ">=",
            "triggerValue": "1",
            "query": {"id": "12", "name": "Critical vulns"},
            "action": [
                {"type": "email", "definition": {"users": [{"username": "a"}, {"username": "b"}]}},
                {"type": "syslog", "definition": {"host": "10.0.0.5"}}
            ]
        }))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/query/12"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "filters": [
                {"filterName": "severity", "value": [{"id": "4", "name": "Critical"}, {"id": "3", "name": "High"}]},
                {"filterName": "exploitAvailable", "value": "true"}
            ]
        }))))
        .mount(&server)
        .await;

    let ctx = test_context("tenable");
    let mut cfg = session_config(&server);
    cfg.access_key = Some(SecureString::from("ak"));
    cfg.secret_key = Some(SecureString::from("sk"));
    let connector = TenableScConnector::new(cfg, ctx.context).unwrap();

    let output = connector
        .execute("tenable-sc-get-alert", &RawArgs::new().with("alert_id", "4"))
        .await
        .unwrap();
    let alert = &output.outputs;
    assert_eq!(alert["LastTriggered"], "Never");
    assert_eq!(alert["State"], "Not Triggered");
    assert_eq!(alert["Behavior"], "Execute on every trigger");
    assert_eq!(alert["Condition"]["Trigger"], "sumip >= 1");
    assert_eq!(alert["Condition"]["Query"], "Critical vulns");
    assert_eq!(
        alert["Condition"]["Filter"][0]["Values"],
        json!(["Critical", "High"])
    );
    assert_eq!(alert["Condition"]["Filter"][1]["Values"], "true");
    assert_eq!(alert["Action"][0]["Values"], json!(["a", "b"]));
    assert_eq!(alert["Action"][1]["Values"], "10.0.0.5");
}

#[tokio::test]
async fn test_missing_credentials_is_config_error() {
    let server = MockServer::start().await;
    let mut cfg = session_config(&server);
    cfg.password = None;
    let ctx = test_context("tenable");
    assert!(matches!(
        TenableScConnector::new(cfg, ctx.context),
        Err(ConnectorError::ConfigError(_))
    ));
}

// =============================================================================
// Scans, vulnerabilities and assets
// =============================================================================

fn api_key_connector(server: &MockServer) -> TenableScConnector {
    let mut cfg = session_config(server);
    cfg.access_key = Some(SecureString::from("ak"));
    cfg.secret_key = Some(SecureString::from("sk"));
    TenableScConnector::new(cfg, test_context("tenable").context).unwrap()
}

#[tokio::test]
async fn test_list_scans() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/scan"))
        .and(query_param("fields", "id,name,description,policy,ownerGroup,owner"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "usable": [{
                "id": "3",
                "name": "Weekly internal",
                "description": "DMZ",
                "policy": {"id": "1000001", "name": "Basic Network Scan"},
                "ownerGroup": {"name": "Full Access"},
                "owner": {"username": "secman"}
            }],
            "manageable": []
        }))))
        .mount(&server)
        .await;

    let connector = api_key_connector(&server);
    let output = connector
        .execute("tenable-sc-list-scans", &RawArgs::new())
        .await
        .unwrap();
    assert_eq!(output.prefix.as_deref(), Some("TenableSC.Scan"));
    assert_eq!(output.outputs[0]["Policy"], "Basic Network Scan");
    assert_eq!(output.outputs[0]["Owner"], "secman");

    let none = connector
        .execute("tenable-sc-list-scans", &RawArgs::new().with("manageable", "true"))
        .await
        .unwrap();
    assert_eq!(none.readable, "No scans found");
}

#[tokio::test]
async fn test_create_scan_expands_usable_assets() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/asset"))
        .and(query_param("fields", "id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "usable": [{"id": "7"}, {"id": "9"}],
            "manageable": [{"id": "7"}]
        }))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/scan"))
        .and(body_partial_json(json!({
            "name": "Nightly",
            "type": "policy",
            "repository": {"id": "1"},
            "policy": {"id": "1000001"},
            "assets": [{"id": "7"}, {"id": "9"}],
            "schedule": {"type": "dependent", "dependentID": "3"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "id": "21",
            "name": "Nightly",
            "type": "policy",
            "createdTime": "1700000000",
            "creator": {"id": "2"},
            "owner": {"name": "secman"},
            "reports": [{"id": "5"}]
        }))))
        .expect(1)
        .mount(&server)
        .await;

    let connector = api_key_connector(&server);
    let args = RawArgs::new()
        .with("name", "Nightly")
        .with("repository_id", "1")
        .with("policy_id", "1000001")
        .with("asset_ids", "AllUsable")
        .with("schedule", "dependent")
        .with("dependent_id", "3");
    let output = connector.execute("tenable-sc-create-scan", &args).await.unwrap();
    assert_eq!(output.outputs["ID"], "21");
    assert_eq!(output.outputs["CreatorID"], "2");
    assert_eq!(output.outputs["CreationTime"], "2023-11-14T22:13:20Z");
    assert_eq!(output.outputs["Reports"], "5");
}

#[tokio::test]
async fn test_launch_scan_and_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/scan/3/launch"))
        .and(body_partial_json(json!({"diagnosticTarget": "10.0.0.8", "diagnosticPassword": "pw"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "scanID": "3",
            "scanResult": {"id": "44", "name": "Weekly internal", "ownerID": "2", "jobID": "900", "status": "Queued"}
        }))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/scanResult/44"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "id": "44", "name": "Weekly internal", "status": "Running", "description": ""
        }))))
        .mount(&server)
        .await;

    let connector = api_key_connector(&server);
    let launched = connector
        .execute(
            "tenable-sc-launch-scan",
            &RawArgs::new()
                .with("scan_id", "3")
                .with("diagnostic_target", "10.0.0.8")
                .with("diagnostic_password", "pw"),
        )
        .await
        .unwrap();
    assert_eq!(launched.prefix.as_deref(), Some("TenableSC.ScanResults"));
    assert_eq!(launched.outputs["JobID"], "900");

    let status = connector
        .execute("tenable-sc-get-scan-status", &RawArgs::new().with("scan_results_id", "44"))
        .await
        .unwrap();
    assert_eq!(status.outputs[0]["Status"], "Running");
}

#[tokio::test]
async fn test_scan_report_with_vulnerabilities() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/scanResult/44"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "id": "44",
            "name": "Weekly internal",
            "status": "Completed",
            "details": "Basic Network Scan",
            "completedChecks": "5000",
            "startTime": "1700000000",
            "finishTime": "1700003600",
            "scanDuration": "3600",
            "scannedIPs": "12",
            "owner": {"username": "secman"},
            "ownerGroup": {"name": "Full Access"},
            "repository": {"name": "Internal"}
        }))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/query"))
        .and(body_partial_json(json!({"tool": "vulnipdetail", "scanID": "44"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({"id": "55"}))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/analysis"))
        .and(body_partial_json(json!({"query": {"id": "55"}, "sourceType": "individual"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "results": [
                {"pluginID": "1", "name": "Low thing", "severity": {"name": "Low"}, "family": {"name": "General"}, "total": "3"},
                {"pluginID": "2", "name": "Bad thing", "severity": {"name": "Critical"}, "family": {"name": "Windows"}, "total": "1"},
                {"pluginID": "3", "name": "Info thing", "severity": {"name": "Info"}, "family": {"name": "General"}, "total": "9"}
            ]
        }))))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/query/55"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .expect(1)
        .mount(&server)
        .await;

    let connector = api_key_connector(&server);
    let output = connector
        .execute(
            "tenable-sc-get-scan-report",
            &RawArgs::new()
                .with("scan_results_id", "44")
                .with("vulnerability_severity", "Low,Critical"),
        )
        .await
        .unwrap();
    let report = &output.outputs;
    assert_eq!(report["Duration"], 60.0);
    assert_eq!(report["EndTime"], "2023-11-14T23:13:20Z");
    assert_eq!(report["RepositoryName"], "Internal");
    let vulns = report["Vulnerability"].as_array().unwrap();
    assert_eq!(vulns.len(), 2);
    assert_eq!(vulns[0]["Severity"], "Critical");
    assert_eq!(vulns[1]["Name"], "Low thing");
    assert!(output.readable.contains("Vulnerabilities"));
}

#[tokio::test]
async fn test_get_vulnerability_with_hosts_and_cves() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/analysis"))
        .and(body_partial_json(json!({
            "query": {"tool": "vulndetails", "startOffset": 0, "endOffset": 50}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "results": [
                {"ip": "10.0.0.5", "macAddress": "00:11", "port": "445", "protocol": "TCP", "severity": {"name": "High"}},
                {"ip": "10.0.0.6", "macAddress": "", "port": "445", "protocol": "TCP", "severity": {"name": "High"}}
            ]
        }))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/plugin/97833"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "id": "97833",
            "name": "MS17-010",
            "description": "SMB server flaws",
            "family": {"name": "Windows"},
            "riskFactor": "High",
            "baseScore": "9.3",
            "exploitAvailable": "true",
            "pluginPubDate": "1700000000",
            "xrefs": "CVE:CVE-2017-0143, CVE:CVE-2017-0144, MSFT:MS17-010"
        }))))
        .mount(&server)
        .await;

    let connector = api_key_connector(&server);
    let output = connector
        .execute(
            "tenable-sc-get-vulnerability",
            &RawArgs::new()
                .with("vulnerability_id", "97833")
                .with("scan_results_id", "44"),
        )
        .await
        .unwrap();
    assert_eq!(output.prefix.as_deref(), Some("TenableSC.ScanResults.Vulnerability"));
    let vuln = &output.outputs;
    assert_eq!(vuln["Severity"], "High");
    assert_eq!(vuln["CVE"], json!(["CVE-2017-0143", "CVE-2017-0144"]));
    assert_eq!(vuln["RiskFactor"], "High");
    assert_eq!(vuln["PluginDetails"]["Family"], "Windows");
    assert_eq!(vuln["PluginDetails"]["Published"], "2023-11-14T22:13:20Z");
    assert_eq!(vuln["Host"][0]["MAC"], "00:11");
    assert_eq!(vuln["Host"].as_array().unwrap().len(), 2);
    assert_eq!(output.indicators, vec![json!({"ID": "CVE-2017-0143"}), json!({"ID": "CVE-2017-0144"})]);
}

#[tokio::test]
async fn test_get_vulnerability_missing_from_scan() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/analysis"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({"results": []}))))
        .mount(&server)
        .await;

    let connector = api_key_connector(&server);
    let err = connector
        .execute(
            "tenable-sc-get-vulnerability",
            &RawArgs::new()
                .with("vulnerability_id", "1")
                .with("scan_results_id", "44"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::NotFound(_)));
}

#[tokio::test]
async fn test_list_and_get_assets() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/asset"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "usable": [{
                "id": "7",
                "name": "DMZ hosts",
                "type": "static",
                "tags": "dmz",
                "ipCount": 12,
                "modifiedTime": "1700000000",
                "owner": {"username": "secman"}
            }],
            "manageable": []
        }))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/asset/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "id": "7",
            "name": "DMZ hosts",
            "createdTime": "1700000000",
            "viewableIPs": [{"ipList": "10.1.0.1,10.1.0.10-10.1.0.20"}],
            "owner": {"username": "secman"},
            "ownerGroup": {"name": "Full Access"}
        }))))
        .mount(&server)
        .await;

    let connector = api_key_connector(&server);
    let list = connector
        .execute("tenable-sc-list-assets", &RawArgs::new())
        .await
        .unwrap();
    assert_eq!(list.outputs[0]["HostCount"], 12);
    assert_eq!(list.outputs[0]["LastModified"], "2023-11-14T22:13:20Z");

    let asset = connector
        .execute("tenable-sc-get-asset", &RawArgs::new().with("asset_id", "7"))
        .await
        .unwrap();
    assert_eq!(asset.outputs["IPs"], json!(["10.1.0.1", "10.1.0.10", "10.1.0.20"]));
    assert_eq!(asset.outputs["Group"], "Full Access");
    assert_eq!(asset.outputs["Created"], "2023-11-14T22:13:20Z");
}
