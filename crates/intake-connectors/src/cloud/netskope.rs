//! Netskope event collector.
//!
//! Pulls alerts and the four event types from the Netskope REST API, v1 or v2,
//! through the shared [`Collector`] so each type keeps its own cursor.

use crate::args::RawArgs;
use crate::auth::{AuthStrategy, HeaderAuth, QueryTokenAuth};
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
    parse_first_fetch, Collector, CollectorConfig, CursorStore, FetchResult, Page, PageFetcher,
    RecordSchema, StreamId, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Event types collected, in fetch order.
pub const EVENT_TYPES: [&str; 5] = ["alert", "application", "audit", "network", "page"];

/// Largest page the API serves.
pub const MAX_EVENTS_PAGE_SIZE: usize = 10_000;

/// More than three pages per type tends to run into host timeouts.
pub const MAX_EVENTS_PER_FETCH: usize = 3 * MAX_EVENTS_PAGE_SIZE;

/// REST API generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    V1,
    #[default]
    V2,
}

impl ApiVersion {
    fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::V1 => "v1",
            ApiVersion::V2 => "v2",
        }
    }

    /// Events per type that `netskope-get-events` returns without a `limit`.
    pub fn default_preview_limit(&self) -> usize {
        match self {
            ApiVersion::V1 => 20,
            ApiVersion::V2 => 50,
        }
    }
}

/// Netskope connector configuration. `base_url` is the tenant URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetskopeConfig {
    #[serde(flatten)]
    pub connector: ConnectorConfig,
    pub api_token: SecureString,
    #[serde(default)]
    pub api_version: ApiVersion,
    #[serde(default = "default_first_fetch")]
    pub first_fetch: String,
    #[serde(default = "default_max_fetch")]
    pub max_fetch: usize,
    #[serde(default = "default_vendor")]
    pub vendor: String,
    #[serde(default = "default_vendor")]
    pub product: String,
}

fn default_first_fetch() -> String {
    "1 day".to_string()
}
fn default_max_fetch() -> usize {
    MAX_EVENTS_PAGE_SIZE
}
fn default_vendor() -> String {
    "netskope".to_string()
}

impl NetskopeConfig {
    /// API root for the configured version, e.g. `https://tenant/api/v2`.
    pub fn api_base(&self) -> String {
        format!(
            "{}/api/{}",
            self.connector.base_url.trim_end_matches('/'),
            self.api_version.as_str()
        )
    }
}

/// Reads pages of one event type from the Netskope API.
pub struct NetskopeFetcher {
    client: HttpClient,
    api_version: ApiVersion,
}

impl NetskopeFetcher {
    pub fn new(config: &NetskopeConfig) -> ConnectorResult<Self> {
        let auth: Arc<dyn AuthStrategy> = match config.api_version {
            ApiVersion::V1 => Arc::new(QueryTokenAuth::new("token", config.api_token.clone())),
            ApiVersion::V2 => Arc::new(HeaderAuth::new(
                "Netskope-Api-Token",
                config.api_token.clone(),
            )),
        };
        let client = HttpClient::new(config.connector.with_base_url(config.api_base()), auth)?;
        Ok(Self {
            client,
            api_version: config.api_version,
        })
    }

    fn request(&self, stream: &StreamId, start: i64, end: i64, limit: usize) -> ApiRequest {
        match self.api_version {
            ApiVersion::V1 if stream.as_str() == "alert" => ApiRequest::get("alerts").json(json!({
                "starttime": start,
                "endtime": end,
                "limit": limit,
            })),
            ApiVersion::V1 => ApiRequest::get("events").json(json!({
                "starttime": start,
                "endtime": end,
                "limit": limit,
                "type": stream.as_str(),
            })),
            ApiVersion::V2 => ApiRequest::get(format!("events/data/{}", stream))
                .query("starttime", start)
                .query("endtime", end)
                .query("limit", limit),
        }
    }

    /// Unwraps the version-specific envelope. Anything but a success envelope
    /// reads as no records.
    fn records(&self, response: Value) -> Vec<Value> {
        let (ok, data) = match self.api_version {
            ApiVersion::V1 => (
                response.get("status").and_then(Value::as_str) == Some("success"),
                response.get("data"),
            ),
            ApiVersion::V2 => (
                response.get("ok").and_then(Value::as_i64) == Some(1),
                response.get("result"),
            ),
        };
        if !ok {
            debug!(?response, "Netskope returned a non-success envelope");
            return Vec::new();
        }
        match data {
            Some(Value::Array(records)) => records.clone(),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl PageFetcher for NetskopeFetcher {
    fn page_size_ceiling(&self) -> usize {
        MAX_EVENTS_PAGE_SIZE
    }

    fn record_schema(&self, _stream: &StreamId) -> RecordSchema {
        RecordSchema::new("_id", "timestamp")
    }

    async fn fetch_page(
        &self,
        stream: &StreamId,
        watermark: Timestamp,
        page_size: usize,
    ) -> FetchResult<Page> {
        let request = self.request(
            stream,
            watermark.epoch_secs(),
            Utc::now().timestamp(),
            page_size,
        );
        let response = self.client.send_json(&request).await?;
        Ok(Page::new(self.records(response)))
    }
}

/// Netskope event collector.
pub struct NetskopeConnector {
    config: NetskopeConfig,
    collector: Collector,
}

impl NetskopeConnector {
    pub fn new(config: NetskopeConfig, ctx: IntegrationContext) -> ConnectorResult<Self> {
        let first_fetch = parse_first_fetch(&config.first_fetch, Utc::now())
            .map_err(|e| ConnectorError::ConfigError(e.to_string()))?;
        let fetcher = Arc::new(NetskopeFetcher::new(&config)?);
        let collector = Collector::new(
            fetcher,
            CursorStore::new(ctx.state.clone(), &ctx.instance),
            ctx.sink.clone(),
            CollectorConfig {
                vendor: config.vendor.clone(),
                product: config.product.clone(),
                first_fetch,
                max_records_per_stream: config.max_fetch.min(MAX_EVENTS_PER_FETCH),
            },
        );

        info!(api_version = config.api_version.as_str(), "Netskope connector initialized");

        Ok(Self { config, collector })
    }

    fn streams() -> Vec<StreamId> {
        EVENT_TYPES.iter().map(|t| StreamId::from(*t)).collect()
    }

    /// Previews new events of every type without moving the cursors.
    async fn get_events(&self, args: &RawArgs) -> ConnectorResult<CommandOutput> {
        let request = GetEventsRequest::try_from(args)?;
        let limit = request
            .limit
            .unwrap_or_else(|| self.config.api_version.default_preview_limit());
        let events = self.collector.preview_all(&Self::streams(), limit).await?;

        if request.should_push_events {
            self.collector.push(&events).await?;
        }

        let outputs: Vec<Value> = events
            .iter()
            .map(|event| {
                let mut payload = event.payload.clone();
                if let Some(obj) = payload.as_object_mut() {
                    obj.insert("timestamp".to_string(), json!(event.time.to_datestring()));
                }
                payload
            })
            .collect();

        let readable = table(
            "Events List:",
            &["_id", "timestamp", "type", "access_method", "app", "traffic_type"],
            &outputs,
        );
        let raw = json!(outputs);
        Ok(CommandOutput::new(readable, "Netskope.Event", raw.clone()).with_raw(raw))
    }
}

/// Arguments of `netskope-get-events`.
#[derive(Debug, Clone, PartialEq)]
pub struct GetEventsRequest {
    /// Falls back to the API version's default when unset.
    pub limit: Option<usize>,
    pub should_push_events: bool,
}

impl TryFrom<&RawArgs> for GetEventsRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            limit: args
                .parse::<usize>("limit")?
                .map(|limit| limit.min(MAX_EVENTS_PER_FETCH)),
            should_push_events: args.bool_or("should_push_events", true)?,
        })
    }
}

#[async_trait]
impl Connector for NetskopeConnector {
    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn connector_type(&self) -> &str {
        "cloud"
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

    /// Fetches at most one record of each type without persisting anything.
    async fn test_connection(&self) -> ConnectorResult<bool> {
        self.collector.preview_all(&Self::streams(), 1).await?;
        Ok(true)
    }
}

#[async_trait]
impl Integration for NetskopeConnector {
    fn commands(&self) -> &'static [&'static str] {
        &["fetch-events", "netskope-get-events"]
    }

    async fn execute(&self, command: &str, args: &RawArgs) -> ConnectorResult<CommandOutput> {
        match command {
            "netskope-get-events" => self.get_events(args).await,
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

    async fn fetch(&self) -> ConnectorResult<FetchSummary> {
        let report = self.collector.run_cycle(&Self::streams()).await?;
        Ok(FetchSummary {
            delivered: report.emitted(),
            report: Some(report),
        })
    }
}
