//! Tenable.sc connector.
//!
//! Fetches triggered alerts as incidents and answers alert, scan, asset,
//! vulnerability and licensing queries. Authenticates with API keys or,
//! failing that, a username/password session that is re-established when the
//! server answers 403.

mod assets;
mod scans;

pub use assets::{GetAssetRequest, ListAssetsRequest};
pub use scans::{
    AssetSelection, CreateScanRequest, GetScanReportRequest, GetScanStatusRequest,
    GetVulnerabilityRequest, LaunchScanRequest, ListScansRequest, ScanSchedule,
};

use crate::args::RawArgs;
use crate::auth::{AuthStrategy, HeaderAuth, SessionLoginAuth, TokenCache};
use crate::command::{table, CommandOutput};
use crate::http::{ApiRequest, HttpClient};
use crate::secure_string::SecureString;
use crate::traits::{
    unknown_command, Connector, ConnectorConfig, ConnectorError, ConnectorHealth,
    ConnectorResult, FetchSummary, Integration, IntegrationContext,
};
use async_trait::async_trait;
use chrono::Utc;
use intake_core::{
    parse_first_fetch, Collector, CollectorConfig, CursorStore, FetchResult, OutputEvent, Page,
    PageFetcher, Record, RecordSchema, StreamId, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

const FETCH_FIELDS: &str = "id,name,description,lastTriggered,triggerName,triggerOperator,\
triggerValue,action,query,owner,ownerGroup,schedule,canManage";

const LIST_FIELDS: &str =
    "id,name,description,didTriggerLastEvaluation,lastTriggered,action,lastEvaluated,ownerGroup,owner";

/// Where each action type keeps its target, under the action's `definition`.
fn action_value_path(action_type: &str) -> Option<&'static str> {
    match action_type {
        "notification" | "email" => Some("users.username"),
        "syslog" => Some("host"),
        "scan" => Some("scan.name"),
        "report" => Some("report.name"),
        "ticket" => Some("assignee.username"),
        _ => None,
    }
}

/// Tenable.sc connector configuration. `base_url` is the server URL; the REST
/// API lives under `/rest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenableScConfig {
    #[serde(flatten)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub access_key: Option<SecureString>,
    #[serde(default)]
    pub secret_key: Option<SecureString>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<SecureString>,
    #[serde(default = "default_first_fetch")]
    pub first_fetch: String,
    #[serde(default = "default_max_fetch")]
    pub max_fetch: usize,
}

fn default_first_fetch() -> String {
    "3 days".to_string()
}
fn default_max_fetch() -> usize {
    1000
}

/// Resolved Tenable.sc credentials.
#[derive(Debug, Clone, PartialEq)]
pub enum TenableCredentials {
    ApiKeys {
        access_key: SecureString,
        secret_key: SecureString,
    },
    Session {
        username: String,
        password: SecureString,
    },
}

fn present(value: &Option<SecureString>) -> Option<SecureString> {
    value.clone().filter(|v| !v.is_blank())
}

impl TenableScConfig {
    pub fn api_base(&self) -> String {
        format!("{}/rest", self.connector.base_url.trim_end_matches('/'))
    }

    /// API keys win when both kinds are configured.
    pub fn credentials(&self) -> ConnectorResult<TenableCredentials> {
        if let (Some(access_key), Some(secret_key)) =
            (present(&self.access_key), present(&self.secret_key))
        {
            return Ok(TenableCredentials::ApiKeys {
                access_key,
                secret_key,
            });
        }
        match (
            self.username.clone().filter(|u| !u.trim().is_empty()),
            present(&self.password),
        ) {
            (Some(username), Some(password)) => Ok(TenableCredentials::Session { username, password }),
            _ => Err(ConnectorError::ConfigError(
                "Please provide either user_name and password or secret_key and access_key"
                    .to_string(),
            )),
        }
    }
}

/// Unwraps the `{response, error_code, error_msg}` envelope.
fn unwrap_response(value: Value) -> ConnectorResult<Value> {
    let code = value.get("error_code").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        let message = value
            .get("error_msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim();
        return Err(ConnectorError::RequestFailed(format!(
            "Got an error from TenableSC, code: {}, details: {}",
            code, message
        )));
    }
    Ok(value.get("response").cloned().unwrap_or(Value::Null))
}

fn epoch(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        _ => 0,
    }
}

/// `%Y-%m-%dT%H:%M:%SZ` for positive epoch seconds, `default` otherwise.
fn timestamp_to_utc(value: Option<&Value>, default: &str) -> String {
    let secs = epoch(value);
    match Timestamp::from_epoch_secs(secs).filter(|_| secs > 0) {
        Some(ts) => ts.to_datestring(),
        None => default.to_string(),
    }
}

/// Values under a dotted path, descending through arrays.
fn values_at(value: &Value, path: &str) -> Value {
    let mut current = vec![value];
    for key in path.split('.') {
        current = current
            .into_iter()
            .flat_map(|v| match v {
                Value::Array(items) => items.iter().filter_map(|i| i.get(key)).collect::<Vec<_>>(),
                other => other.get(key).into_iter().collect(),
            })
            .flat_map(|v| match v {
                Value::Array(items) => items.iter().collect::<Vec<_>>(),
                other => vec![other],
            })
            .collect();
    }
    match current.as_slice() {
        [] => Value::Null,
        [single] => (*single).clone(),
        many => Value::Array(many.iter().map(|v| (*v).clone()).collect()),
    }
}

/// The `usable` or `manageable` half of a listing response.
fn owned_elements(response: &Value, manageable: bool) -> Vec<Value> {
    let key = if manageable { "manageable" } else { "usable" };
    response
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// A response id as a path segment.
fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn triggered_state(alert: &Value) -> &'static str {
    if alert.get("didTriggerLastEvaluation").and_then(Value::as_str) == Some("true") {
        "Triggered"
    } else {
        "Not Triggered"
    }
}

/// Reads usable alerts as an `alert` stream.
pub struct TenableAlertFetcher {
    client: Arc<HttpClient>,
}

impl TenableAlertFetcher {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for TenableAlertFetcher {
    fn page_size_ceiling(&self) -> usize {
        10_000
    }

    fn record_schema(&self, _stream: &StreamId) -> RecordSchema {
        RecordSchema::new("id", "lastTriggered")
    }

    /// The alert endpoint has no time filter or paging, so the window is
    /// applied here.
    async fn fetch_page(
        &self,
        _stream: &StreamId,
        watermark: Timestamp,
        page_size: usize,
    ) -> FetchResult<Page> {
        let request = ApiRequest::get("alert").query("fields", FETCH_FIELDS);
        let response = unwrap_response(self.client.send_json(&request).await?)?;

        let mut alerts: Vec<(i64, Value)> = response
            .get("usable")
            .and_then(Value::as_array)
            .map(|alerts| {
                alerts
                    .iter()
                    .map(|a| (epoch(a.get("lastTriggered")), a.clone()))
                    .filter(|(t, _)| *t > 0 && *t >= watermark.epoch_secs())
                    .collect()
            })
            .unwrap_or_default();
        alerts.sort_by_key(|(t, _)| *t);

        Ok(Page::new(
            alerts.into_iter().take(page_size).map(|(_, a)| a).collect(),
        ))
    }

    fn enrich(&self, stream: &StreamId, record: Record) -> OutputEvent {
        let name = record
            .body
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let payload = json!({
            "name": format!("Tenable.sc Alert Triggered - {}", name),
            "occurred": record.timestamp.to_datestring(),
            "rawJSON": record.body.to_string(),
        });
        OutputEvent {
            stream: stream.clone(),
            id: record.id,
            time: record.timestamp,
            payload,
        }
    }
}

/// Tenable.sc connector.
pub struct TenableScConnector {
    config: TenableScConfig,
    client: Arc<HttpClient>,
    collector: Collector,
}

impl TenableScConnector {
    pub fn new(config: TenableScConfig, ctx: IntegrationContext) -> ConnectorResult<Self> {
        let first_fetch = parse_first_fetch(&config.first_fetch, Utc::now())
            .map_err(|e| ConnectorError::ConfigError(e.to_string()))?;

        let auth: Arc<dyn AuthStrategy> = match config.credentials()? {
            TenableCredentials::ApiKeys {
                access_key,
                secret_key,
            } => Arc::new(HeaderAuth::new(
                "x-apikey",
                format!(
                    "accesskey={}; secretkey={}",
                    access_key.expose_secret(),
                    secret_key.expose_secret()
                ),
            )),
            TenableCredentials::Session { username, password } => Arc::new(SessionLoginAuth::new(
                "token",
                username,
                password,
                "X-SecurityCenter",
                "TNS_SESSIONID",
                TokenCache::persistent(ctx.state.clone(), ctx.state_key("auth")),
            )),
        };

        let mut connector = config.connector.with_base_url(config.api_base());
        connector
            .headers
            .entry("Accept".to_string())
            .or_insert_with(|| "application/json".to_string());
        let client = Arc::new(HttpClient::new(connector, auth)?);

        let collector = Collector::new(
            Arc::new(TenableAlertFetcher::new(client.clone())),
            CursorStore::new(ctx.state.clone(), &ctx.instance),
            ctx.sink.clone(),
            CollectorConfig {
                vendor: "tenable".to_string(),
                product: "tenable.sc".to_string(),
                first_fetch,
                max_records_per_stream: config.max_fetch,
            },
        );

        info!("Tenable.sc connector initialized");

        Ok(Self {
            config,
            client,
            collector,
        })
    }

    /// Sends a request and unwraps the response envelope.
    async fn call(&self, request: ApiRequest) -> ConnectorResult<Value> {
        unwrap_response(self.client.send_json(&request).await?)
    }

    async fn list_alerts(&self, request: ListAlertsRequest) -> ConnectorResult<CommandOutput> {
        let response = self
            .call(ApiRequest::get("alert").query("fields", LIST_FIELDS))
            .await?;
        let alerts = owned_elements(&response, request.manageable);

        if alerts.is_empty() {
            return Ok(CommandOutput::message("No alerts found"));
        }

        let mapped: Vec<Value> = alerts
            .iter()
            .map(|a| {
                json!({
                    "ID": a.get("id"),
                    "Name": a.get("name"),
                    "State": triggered_state(a),
                    "Actions": values_at(a.get("action").unwrap_or(&Value::Null), "type"),
                    "LastTriggered": timestamp_to_utc(a.get("lastTriggered"), "Never"),
                    "LastEvaluated": timestamp_to_utc(a.get("lastEvaluated"), ""),
                    "Group": a.pointer("/ownerGroup/name"),
                    "Owner": a.pointer("/owner/username"),
                })
            })
            .collect();

        let readable = table(
            "Tenable.sc Alerts",
            &["ID", "Name", "Actions", "State", "LastTriggered", "LastEvaluated", "Group", "Owner"],
            &mapped,
        );
        Ok(CommandOutput::new(readable, "TenableSC.Alert", Value::Array(mapped))
            .with_raw(response))
    }

    async fn get_alert(&self, request: GetAlertRequest) -> ConnectorResult<CommandOutput> {
        let alert = self
            .call(ApiRequest::get(format!("alert/{}", request.alert_id)))
            .await?;
        if alert.is_null() || alert.as_object().is_some_and(Map::is_empty) {
            return Ok(CommandOutput::message("Alert not found"));
        }

        let query = match alert.pointer("/query/id").map(id_string) {
            Some(query_id) => self.call(ApiRequest::get(format!("query/{}", query_id))).await?,
            None => Value::Null,
        };

        let behavior = if alert.get("executeOnEveryTrigger").and_then(Value::as_str) == Some("true")
        {
            "Execute on every trigger"
        } else {
            "Execute only on first trigger"
        };

        let mut condition = json!({
            "Trigger": format!(
                "{} {} {}",
                alert.get("triggerName").and_then(Value::as_str).unwrap_or_default(),
                alert.get("triggerOperator").and_then(Value::as_str).unwrap_or_default(),
                alert.get("triggerValue").and_then(Value::as_str).unwrap_or_default(),
            ),
            "Query": alert.pointer("/query/name"),
        });

        let filters: Vec<Value> = query
            .get("filters")
            .and_then(Value::as_array)
            .map(|filters| {
                filters
                    .iter()
                    .map(|f| {
                        let values = match f.get("value") {
                            Some(list @ Value::Array(_)) => values_at(list, "name"),
                            Some(other) => other.clone(),
                            None => Value::Null,
                        };
                        json!({"Name": f.get("filterName"), "Values": values})
                    })
                    .collect()
            })
            .unwrap_or_default();
        if !query.is_null() {
            condition["Filter"] = json!(filters);
        }

        let actions: Vec<Value> = alert
            .get("action")
            .and_then(Value::as_array)
            .map(|actions| {
                actions
                    .iter()
                    .map(|a| {
                        let action_type = a.get("type").and_then(Value::as_str).unwrap_or_default();
                        let values = action_value_path(action_type)
                            .map(|path| values_at(a, &format!("definition.{}", path)))
                            .unwrap_or(Value::Null);
                        json!({"Type": action_type, "Values": values})
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut mapped = json!({
            "ID": alert.get("id"),
            "Name": alert.get("name"),
            "Description": alert.get("description"),
            "LastTriggered": timestamp_to_utc(alert.get("lastTriggered"), "Never"),
            "State": triggered_state(&alert),
            "Behavior": behavior,
        });

        let mut readable = table(
            "Tenable.sc Alert",
            &["ID", "Name", "Description", "LastTriggered", "State", "Behavior"],
            &[mapped.clone()],
        );
        readable.push_str("\n\n");
        readable.push_str(&table("Condition", &["Trigger", "Query"], &[condition.clone()]));
        if !filters.is_empty() {
            readable.push_str("\n\n");
            readable.push_str(&table("Filters", &["Name", "Values"], &filters));
        }
        if !actions.is_empty() {
            readable.push_str("\n\n");
            readable.push_str(&table("Actions", &["Type", "Values"], &actions));
            mapped["Action"] = json!(actions);
        }
        mapped["Condition"] = condition;

        Ok(CommandOutput::new(readable, "TenableSC.Alert", mapped).with_raw(alert))
    }

    async fn get_system_licensing(&self) -> ConnectorResult<CommandOutput> {
        let status = self.call(ApiRequest::get("status")).await?;
        if status.is_null() {
            return Err(ConnectorError::InvalidResponse(
                "Could not retrieve system licensing".to_string(),
            ));
        }
        let mapped = json!({
            "License": status.get("licenseStatus"),
            "LicensedIPS": status.get("licensedIPs"),
            "ActiveIPS": status.get("activeIPs"),
        });
        let readable = table(
            "Tenable.sc Licensing information",
            &["License", "LicensedIPS", "ActiveIPS"],
            &[mapped.clone()],
        );
        Ok(CommandOutput::new(readable, "TenableSC.Status", mapped).with_raw(status))
    }
}

/// Arguments of `tenable-sc-list-alerts`.
#[derive(Debug, Clone, PartialEq)]
pub struct ListAlertsRequest {
    /// List the alerts the user can manage instead of those they can use.
    pub manageable: bool,
}

impl TryFrom<&RawArgs> for ListAlertsRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            manageable: args.bool_or("manageable", false)?,
        })
    }
}

/// Arguments of `tenable-sc-get-alert`.
#[derive(Debug, Clone, PartialEq)]
pub struct GetAlertRequest {
    pub alert_id: String,
}

impl TryFrom<&RawArgs> for GetAlertRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            alert_id: args.required("alert_id")?.to_string(),
        })
    }
}

#[async_trait]
impl Connector for TenableScConnector {
    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn connector_type(&self) -> &str {
        "vulnerability"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![
            "health_check".to_string(),
            "test_connection".to_string(),
            "fetch_incidents".to_string(),
            "manage_scans".to_string(),
            "list_assets".to_string(),
            "get_vulnerability".to_string(),
        ]
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        match self.test_connection().await {
            Ok(_) => Ok(ConnectorHealth::Healthy),
            Err(e) => Ok(ConnectorHealth::Unhealthy(e.to_string())),
        }
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        self.call(ApiRequest::get("status")).await?;
        Ok(true)
    }
}

#[async_trait]
impl Integration for TenableScConnector {
    fn commands(&self) -> &'static [&'static str] {
        &[
            "fetch-incidents",
            "tenable-sc-list-alerts",
            "tenable-sc-get-alert",
            "tenable-sc-get-system-licensing",
            "tenable-sc-list-scans",
            "tenable-sc-create-scan",
            "tenable-sc-launch-scan",
            "tenable-sc-get-scan-status",
            "tenable-sc-get-scan-report",
            "tenable-sc-get-vulnerability",
            "tenable-sc-list-assets",
            "tenable-sc-get-asset",
        ]
    }

    async fn execute(&self, command: &str, args: &RawArgs) -> ConnectorResult<CommandOutput> {
        match command {
            "tenable-sc-list-alerts" => self.list_alerts(ListAlertsRequest::try_from(args)?).await,
            "tenable-sc-get-alert" => self.get_alert(GetAlertRequest::try_from(args)?).await,
            "tenable-sc-get-system-licensing" => self.get_system_licensing().await,
            "tenable-sc-list-scans" => self.list_scans(ListScansRequest::try_from(args)?).await,
            "tenable-sc-create-scan" => self.create_scan(CreateScanRequest::try_from(args)?).await,
            "tenable-sc-launch-scan" => self.launch_scan(LaunchScanRequest::try_from(args)?).await,
            "tenable-sc-get-scan-status" => {
                self.get_scan_status(GetScanStatusRequest::try_from(args)?).await
            }
            "tenable-sc-get-scan-report" => {
                self.get_scan_report(GetScanReportRequest::try_from(args)?).await
            }
            "tenable-sc-get-vulnerability" => {
                self.get_vulnerability(GetVulnerabilityRequest::try_from(args)?).await
            }
            "tenable-sc-list-assets" => self.list_assets(ListAssetsRequest::try_from(args)?).await,
            "tenable-sc-get-asset" => self.get_asset(GetAssetRequest::try_from(args)?).await,
            "fetch-incidents" => {
                let summary = self.fetch().await?;
                Ok(CommandOutput::message(format!(
                    "Created {} incidents",
                    summary.delivered
                )))
            }
            _ => Err(unknown_command(self.name(), command)),
        }
    }

    async fn fetch(&self) -> ConnectorResult<FetchSummary> {
        let report = self.collector.run_cycle(&[StreamId::from("alert")]).await?;
        Ok(FetchSummary {
            delivered: report.emitted(),
            report: Some(report),
        })
    }

    async fn close(&self) -> ConnectorResult<()> {
        self.client.logout().await
    }
}
