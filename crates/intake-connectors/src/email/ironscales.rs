//! IRONSCALES event collector.
//!
//! IRONSCALES only exposes the list of open incident IDs and a per-incident
//! detail call, so the cursor is the highest incident ID already ingested.
//! On the very first fetch the open IDs are bisected by report time to skip
//! everything older than the first-fetch window.

use crate::args::RawArgs;
use crate::auth::{JwtExchangeAuth, TokenCache};
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
    load_state, parse_first_fetch, save_state, seek, EventSink, FetchError, FetchResult,
    OutputEvent, StateStore, StreamId, TimeProbe, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const VENDOR: &str = "ironscales";
pub const PRODUCT: &str = "ironscales";

/// IRONSCALES connector configuration. `base_url` is the service URL; the
/// API lives under `/appapi`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IronscalesConfig {
    #[serde(flatten)]
    pub connector: ConnectorConfig,
    pub company_id: String,
    pub api_key: SecureString,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_first_fetch")]
    pub first_fetch: String,
    #[serde(default = "default_max_fetch")]
    pub max_fetch: usize,
    /// Specific incidents to ingest instead of the open ones.
    #[serde(default)]
    pub fetch_ids: Vec<i64>,
}

fn default_first_fetch() -> String {
    "3 days".to_string()
}
fn default_max_fetch() -> usize {
    1000
}

impl IronscalesConfig {
    pub fn api_base(&self) -> String {
        format!("{}/appapi", self.connector.base_url.trim_end_matches('/'))
    }
}

/// Persisted fetch position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IronscalesState {
    pub last_id: Option<i64>,
}

/// IRONSCALES connector.
pub struct IronscalesConnector {
    config: IronscalesConfig,
    client: HttpClient,
    state: Arc<dyn StateStore>,
    sink: Arc<dyn EventSink>,
    state_key: String,
    first_fetch: Timestamp,
}

impl IronscalesConnector {
    pub fn new(config: IronscalesConfig, ctx: IntegrationContext) -> ConnectorResult<Self> {
        let first_fetch = parse_first_fetch(&config.first_fetch, Utc::now())
            .map_err(|e| ConnectorError::ConfigError(e.to_string()))?;

        let auth = JwtExchangeAuth::new(
            "/get-token/",
            config.api_key.clone(),
            config.scopes.clone(),
            TokenCache::persistent(ctx.state.clone(), ctx.state_key("auth")),
        );
        let client = HttpClient::new(
            config.connector.with_base_url(config.api_base()),
            Arc::new(auth),
        )?;

        info!(company_id = %config.company_id, "IRONSCALES connector initialized");

        Ok(Self {
            client,
            state: ctx.state.clone(),
            sink: ctx.sink.clone(),
            state_key: ctx.state_key("last_run"),
            first_fetch,
            config,
        })
    }

    pub async fn open_incident_ids(&self) -> ConnectorResult<Vec<i64>> {
        let response = self
            .client
            .get_json(&format!("/incident/{}/open/", self.config.company_id))
            .await?;
        Ok(response
            .get("incident_ids")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default())
    }

    pub async fn incident(&self, incident_id: i64) -> ConnectorResult<Value> {
        let request = ApiRequest::get(format!(
            "/incident/{}/details/{}",
            self.config.company_id, incident_id
        ))
        .json(json!({
            "company_id": self.config.company_id,
            "incident_id": incident_id,
        }));
        self.client.send_json(&request).await
    }

    /// Incident IDs to consider this cycle, ascending.
    async fn candidate_ids(&self, last_id: Option<i64>) -> ConnectorResult<Vec<i64>> {
        if !self.config.fetch_ids.is_empty() {
            let mut ids = self.config.fetch_ids.clone();
            ids.sort_unstable();
            return Ok(ids);
        }

        let mut ids = self.open_incident_ids().await?;
        ids.sort_unstable();
        match last_id {
            Some(_) => Ok(ids),
            None => Ok(seek(&ids, self.first_fetch, self).await?),
        }
    }

    fn to_output_events(&self, incident: &Value) -> Vec<OutputEvent> {
        let incident_id = incident
            .get("incident_id")
            .map(|v| v.to_string())
            .unwrap_or_default();
        let stream = StreamId::from("incident");

        incident_to_events(incident)
            .into_iter()
            .enumerate()
            .filter_map(|(n, payload)| {
                let Some(time) = payload.get("_time").and_then(Timestamp::from_value) else {
                    warn!(%incident_id, "Dropping report with unparsable first_reported_date");
                    metrics::counter!("intake_malformed_records_total", "stream" => "incident")
                        .increment(1);
                    return None;
                };
                Some(OutputEvent {
                    stream: stream.clone(),
                    id: format!("{}-{}", incident_id, n),
                    time,
                    payload,
                })
            })
            .collect()
    }

    async fn get_events(&self, args: &RawArgs) -> ConnectorResult<CommandOutput> {
        let request = GetEventsRequest::try_from(args)?;

        let mut events = Vec::new();
        for id in self.open_incident_ids().await? {
            let incident = self.incident(id).await?;
            events.extend(self.to_output_events(&incident));
            if events.len() >= request.limit {
                break;
            }
        }

        if request.should_fetch_events && !events.is_empty() {
            self.sink.send(VENDOR, PRODUCT, &events).await?;
        }

        let rows: Vec<Value> = events.iter().map(|e| e.payload.clone()).collect();
        let readable = table(
            "Open Incidents",
            &[
                "incident_id",
                "classification",
                "first_reported_date",
                "first_reported_by",
                "sender_email",
            ],
            &rows,
        );
        let raw = Value::Array(rows);
        Ok(CommandOutput::new(readable, "Ironscales.Event", raw.clone()).with_raw(raw))
    }
}

/// One event per incident report: the incident fields without `reports`,
/// `_time` set from `first_reported_date`, overlaid with the report fields.
pub fn incident_to_events(incident: &Value) -> Vec<Value> {
    let reports: Vec<&Value> = match incident.get("reports") {
        Some(Value::Array(items)) => items.iter().collect(),
        None | Some(Value::Null) => Vec::new(),
        Some(single) => vec![single],
    };

    let mut base = incident.as_object().cloned().unwrap_or_default();
    base.remove("reports");
    if let Some(first) = base.get("first_reported_date").cloned() {
        base.insert("_time".to_string(), first);
    }

    reports
        .into_iter()
        .map(|report| {
            let mut event = base.clone();
            if let Some(fields) = report.as_object() {
                for (k, v) in fields {
                    event.insert(k.clone(), v.clone());
                }
            }
            Value::Object(event)
        })
        .collect()
}

#[async_trait]
impl TimeProbe<i64> for IronscalesConnector {
    async fn time_of(&self, id: &i64) -> FetchResult<Timestamp> {
        let incident = self.incident(*id).await?;
        incident
            .get("first_reported_date")
            .and_then(Timestamp::from_value)
            .ok_or_else(|| {
                FetchError::Fatal(format!(
                    "Missing field `first_reported_date` in incident {}",
                    id
                ))
            })
    }
}

/// Arguments of `ironscales-get-events`.
#[derive(Debug, Clone, PartialEq)]
pub struct GetEventsRequest {
    pub limit: usize,
    pub should_fetch_events: bool,
}

impl TryFrom<&RawArgs> for GetEventsRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            limit: args.usize_or("limit", 10)?,
            should_fetch_events: args.bool_or("should_fetch_events", false)?,
        })
    }
}

#[async_trait]
impl Connector for IronscalesConnector {
    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn connector_type(&self) -> &str {
        "email"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![
            "health_check".to_string(),
            "test_connection".to_string(),
            "fetch_events".to_string(),
        ]
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        match self.test_connection().await {
            Ok(_) => Ok(ConnectorHealth::Healthy),
            Err(e) => Ok(ConnectorHealth::Unhealthy(e.to_string())),
        }
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        self.open_incident_ids().await?;
        Ok(true)
    }
}

#[async_trait]
impl Integration for IronscalesConnector {
    fn commands(&self) -> &'static [&'static str] {
        &["fetch-events", "ironscales-get-events"]
    }

    async fn execute(&self, command: &str, args: &RawArgs) -> ConnectorResult<CommandOutput> {
        match command {
            "ironscales-get-events" => self.get_events(args).await,
            "fetch-events" => {
                let summary = self.fetch().await?;
                Ok(CommandOutput::message(format!(
                    "Delivered {} events",
                    summary.delivered
                )))
            }
            _ => Err(unknown_command(self.name(), command)),
        }
    }

    /// Ingests incidents newer than the stored `last_id`.
    ///
    /// Nothing is delivered or persisted if any incident lookup fails.
    #[instrument(skip(self), fields(integration = %self.config.connector.name))]
    async fn fetch(&self) -> ConnectorResult<FetchSummary> {
        let state: IronscalesState = load_state(self.state.as_ref(), &self.state_key)
            .await?
            .unwrap_or_default();
        let floor = state.last_id.unwrap_or(-1);

        let mut events = Vec::new();
        let mut last_id = state.last_id;
        for id in self
            .candidate_ids(state.last_id)
            .await?
            .into_iter()
            .filter(|id| *id > floor)
        {
            let incident = self.incident(id).await?;
            events.extend(self.to_output_events(&incident));
            last_id = Some(last_id.map_or(id, |current| current.max(id)));
            if events.len() >= self.config.max_fetch {
                break;
            }
        }

        if !events.is_empty() {
            self.sink.send(VENDOR, PRODUCT, &events).await?;
            metrics::counter!("intake_events_emitted_total", "stream" => "incident")
                .increment(events.len() as u64);
        }
        save_state(
            self.state.as_ref(),
            &self.state_key,
            &IronscalesState { last_id },
        )
        .await?;

        debug!(delivered = events.len(), ?last_id, "IRONSCALES fetch finished");
        Ok(FetchSummary::delivered(events.len()))
    }
}
