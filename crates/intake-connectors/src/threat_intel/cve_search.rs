//! CVE Search connector.
//!
//! Looks up CVEs in a CVE-Search instance (circl.lu by default) and builds a
//! CVE indicator for each hit: CPE-derived tags and relationships, the CVSS
//! metrics table and reference publications.

use super::cvss::cvss_color;
use crate::args::RawArgs;
use crate::auth::NoAuth;
use crate::command::{table, CommandOutput};
use crate::http::{ApiRequest, HttpClient, RateLimitConfig, ResponseCache};
use crate::traits::{
    unknown_command, Connector, ConnectorConfig, ConnectorError, ConnectorHealth,
    ConnectorResult, Integration,
};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default public CVE-Search API.
pub const DEFAULT_BASE_URL: &str = "https://cve.circl.lu/api/";

const CVE_ID_PATTERN: &str = r"(?i)^CVE-\d{4}-\d{4,}$";

/// CVE Search connector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CveSearchConfig {
    #[serde(flatten)]
    pub connector: ConnectorConfig,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_max_cache")]
    pub max_cache_entries: u64,
    #[serde(default = "default_rate_limit")]
    pub requests_per_minute: u32,
}

fn default_cache_ttl() -> u64 {
    3600
}
fn default_max_cache() -> u64 {
    1000
}
fn default_rate_limit() -> u32 {
    60
}

impl CveSearchConfig {
    /// Configuration pointing at the public circl.lu instance.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            connector: ConnectorConfig::new(name, DEFAULT_BASE_URL),
            cache_ttl_secs: default_cache_ttl(),
            max_cache_entries: default_max_cache(),
            requests_per_minute: default_rate_limit(),
        }
    }
}

/// Context fields for one CVE.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CveContext {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "CVSS")]
    pub cvss: Value,
    #[serde(rename = "Published")]
    pub published: String,
    #[serde(rename = "Modified")]
    pub modified: String,
    #[serde(rename = "Description")]
    pub description: String,
}

impl CveContext {
    pub fn from_cve(cve: &Value) -> Self {
        let text = |key: &str| {
            cve.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let cvss = match cve.get("cvss") {
            None | Some(Value::Null) => json!("N\\A"),
            Some(Value::String(s)) if s.is_empty() => json!("N\\A"),
            Some(score) => score.clone(),
        };
        Self {
            id: text("id"),
            cvss,
            published: text("Published").trim_end_matches('Z').to_string(),
            modified: text("Modified").trim_end_matches('Z').to_string(),
            description: text("summary"),
        }
    }
}

/// A relationship between the CVE and an affected entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relationship {
    pub name: String,
    pub entity_a: String,
    pub entity_a_type: String,
    pub entity_b: String,
    pub entity_b_type: String,
}

impl Relationship {
    fn targets(cve_id: &str, entity: &str, entity_type: &str) -> Self {
        Self {
            name: "targets".to_string(),
            entity_a: cve_id.to_string(),
            entity_a_type: "cve".to_string(),
            entity_b: entity.to_string(),
            entity_b_type: entity_type.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CvssMetric {
    pub metrics: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Publication {
    pub title: String,
    pub link: String,
    pub source: String,
}

/// A CVE indicator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CveIndicator {
    pub id: String,
    pub cvss: Option<Value>,
    pub cvss_vector: Option<String>,
    pub cvss_table: Vec<CvssMetric>,
    pub published: Option<String>,
    pub modified: Option<String>,
    pub description: Option<String>,
    pub vulnerable_products: Vec<String>,
    pub vulnerable_configurations: Vec<String>,
    pub publications: Vec<Publication>,
    pub tags: Vec<String>,
    pub relationships: Vec<Relationship>,
}

/// Splits a CPE 2.3 name on colons that are not escaped with a backslash.
pub fn split_cpe(cpe: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in cpe.chars() {
        if c == ':' && !escaped {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
        escaped = c == '\\';
    }
    parts.push(current);
    parts
}

/// First letter upper-cased, the rest lower-cased.
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

fn cpe_entity(part: Option<&String>) -> String {
    part.map(|p| capitalize(p).replace('\\', "").replace('_', " "))
        .unwrap_or_default()
}

/// Tags and relationships derived from a split CPE.
pub fn parse_cpe(cpe: &[String], cve_id: &str) -> (Vec<String>, Vec<Relationship>) {
    let vendor = cpe_entity(cpe.get(3));
    let product = cpe_entity(cpe.get(4));
    let part = match cpe.get(2).map(String::as_str) {
        Some("a") => "Application",
        Some("o") => "Operating-System",
        Some("h") => "Hardware",
        _ => "",
    };

    let mut relationships = Vec::new();
    if !vendor.is_empty() {
        relationships.push(Relationship::targets(cve_id, &vendor, "identity"));
    }
    if !product.is_empty() {
        relationships.push(Relationship::targets(cve_id, &product, "software"));
    }

    let tags = [vendor, product, part.to_string()]
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect();
    (tags, relationships)
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Builds the indicator for a CVE-Search record.
pub fn generate_indicator(cve: &Value) -> CveIndicator {
    let id = cve
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let opt_str = |key: &str| cve.get(key).and_then(Value::as_str).map(str::to_string);

    let products = strings(cve.get("vulnerable_product"));
    let (mut tags, relationships) = match products.first() {
        Some(first) => parse_cpe(&split_cpe(first), &id),
        None => (Vec::new(), Vec::new()),
    };
    if let Some(cwe) = opt_str("cwe").filter(|c| !c.is_empty()) {
        tags.push(cwe);
    }

    let cvss_table = ["impact", "access"]
        .iter()
        .filter_map(|category| cve.get(*category).and_then(Value::as_object))
        .flat_map(|metrics| {
            metrics.iter().map(|(k, v)| CvssMetric {
                metrics: k.clone(),
                value: v.clone(),
            })
        })
        .collect();

    let vulnerable_configurations = cve
        .get("vulnerable_configuration")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|c| c.get("id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let publications = strings(cve.get("references"))
        .into_iter()
        .map(|link| Publication {
            title: id.clone(),
            link,
            source: "Circl.lu".to_string(),
        })
        .collect();

    CveIndicator {
        cvss: cve.get("cvss").filter(|v| !v.is_null()).cloned(),
        cvss_vector: opt_str("cvss-vector"),
        cvss_table,
        published: opt_str("Published"),
        modified: opt_str("Modified"),
        description: opt_str("summary"),
        vulnerable_products: products,
        vulnerable_configurations,
        publications,
        tags,
        relationships,
        id,
    }
}

/// Arguments of `cve`.
#[derive(Debug, Clone, PartialEq)]
pub struct CveRequest {
    pub cve_ids: Vec<String>,
}

/// Arguments of `cve-latest`.
#[derive(Debug, Clone, PartialEq)]
pub struct CveLatestRequest {
    pub limit: usize,
}

impl TryFrom<&RawArgs> for CveLatestRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            limit: args.usize_or("limit", 30)?,
        })
    }
}

/// CVE Search connector.
pub struct CveSearchConnector {
    config: CveSearchConfig,
    client: HttpClient,
    cache: ResponseCache<Value>,
    cve_id: Regex,
}

impl CveSearchConnector {
    pub fn new(config: CveSearchConfig) -> ConnectorResult<Self> {
        let rate_limit = RateLimitConfig {
            max_requests: config.requests_per_minute,
            period: Duration::from_secs(60),
            burst_size: 10,
        };
        let client = HttpClient::with_rate_limit(
            config.connector.clone(),
            Arc::new(NoAuth),
            Some(rate_limit),
        )?;
        let cache = ResponseCache::new(
            Duration::from_secs(config.cache_ttl_secs),
            config.max_cache_entries,
        );
        let cve_id =
            Regex::new(CVE_ID_PATTERN).map_err(|e| ConnectorError::Internal(e.to_string()))?;

        info!("CVE Search connector initialized");

        Ok(Self {
            config,
            client,
            cache,
            cve_id,
        })
    }

    pub fn is_valid_cve_id(&self, id: &str) -> bool {
        self.cve_id.is_match(id)
    }

    fn cve_request(&self, args: &RawArgs) -> ConnectorResult<CveRequest> {
        let cve_ids = args.list("cve_id");
        if cve_ids.is_empty() {
            return Err(ConnectorError::InvalidRequest(
                "Missing required argument 'cve_id'".to_string(),
            ));
        }
        if let Some(bad) = cve_ids.iter().find(|id| !self.is_valid_cve_id(id)) {
            return Err(ConnectorError::InvalidRequest(format!(
                "\"{}\" is not a valid cve ID",
                bad
            )));
        }
        Ok(CveRequest { cve_ids })
    }

    /// Fetches one CVE. An empty or null body reads as not found.
    pub async fn lookup(&self, cve_id: &str) -> ConnectorResult<Option<Value>> {
        let key = format!("cve:{}", cve_id.to_uppercase());
        let value = self
            .cache
            .get_or_try_insert_with(key, || async {
                debug!(cve_id, "Looking up CVE");
                self.client.get_json(&format!("cve/{}", cve_id)).await
            })
            .await?;
        let empty = value.is_null() || value.as_object().is_some_and(|o| o.is_empty());
        Ok((!empty).then_some(value))
    }

    async fn cve(&self, request: CveRequest) -> ConnectorResult<CommandOutput> {
        let mut contexts = Vec::new();
        let mut indicators = Vec::new();
        let mut raw = Vec::new();
        let mut missing = Vec::new();

        for id in &request.cve_ids {
            match self.lookup(id).await? {
                Some(cve) => {
                    contexts.push(json!(CveContext::from_cve(&cve)));
                    indicators.push(json!(generate_indicator(&cve)));
                    raw.push(cve);
                }
                None => missing.push(format!("No results found for cve {}", id)),
            }
        }

        let mut sections = Vec::new();
        if !contexts.is_empty() {
            sections.push(table(
                "CVE Search results",
                &["ID", "CVSS", "Published", "Modified", "Description"],
                &contexts,
            ));
        }
        sections.extend(missing);

        Ok(
            CommandOutput::new(sections.join("\n\n"), "CVEsearch.CVE", Value::Array(contexts))
                .with_raw(Value::Array(raw))
                .with_indicators(indicators),
        )
    }

    async fn cve_latest(&self, request: CveLatestRequest) -> ConnectorResult<CommandOutput> {
        let response = self
            .client
            .get_json(&format!("last/{}", request.limit))
            .await?;
        let cves = response.as_array().cloned().unwrap_or_default();
        if cves.is_empty() {
            return Ok(CommandOutput::message("No results found"));
        }

        let contexts: Vec<Value> = cves
            .iter()
            .map(|cve| json!(CveContext::from_cve(cve)))
            .collect();
        let indicators = cves.iter().map(|cve| json!(generate_indicator(cve))).collect();
        let readable = table(
            "Latest CVEs",
            &["ID", "CVSS", "Published", "Modified", "Description"],
            &contexts,
        );

        Ok(CommandOutput::new(readable, "CVE", Value::Array(contexts))
            .with_raw(response)
            .with_indicators(indicators))
    }

    fn cvss_color(&self, args: &RawArgs) -> ConnectorResult<CommandOutput> {
        let score: f64 = args.parse("score")?.unwrap_or(0.0);
        let color = cvss_color(score);
        Ok(CommandOutput::new(
            format!("CVSS {} => {}", score, color),
            "CVE.Color",
            json!({"Score": score, "Color": color}),
        ))
    }
}

#[async_trait]
impl Connector for CveSearchConnector {
    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn connector_type(&self) -> &str {
        "threat_intel"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![
            "health_check".to_string(),
            "test_connection".to_string(),
            "lookup_cve".to_string(),
        ]
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        match self.test_connection().await {
            Ok(_) => Ok(ConnectorHealth::Healthy),
            Err(e) => Ok(ConnectorHealth::Unhealthy(e.to_string())),
        }
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        match self.client.get_json("last/1").await {
            Ok(_) => Ok(true),
            // The public instance is slow; a timeout still proves reachability.
            Err(ConnectorError::Timeout(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Integration for CveSearchConnector {
    fn commands(&self) -> &'static [&'static str] {
        &["cve", "cve-latest", "cve-cvss-color"]
    }

    async fn execute(&self, command: &str, args: &RawArgs) -> ConnectorResult<CommandOutput> {
        match command {
            "cve" => self.cve(self.cve_request(args)?).await,
            "cve-latest" => self.cve_latest(CveLatestRequest::try_from(args)?).await,
            "cve-cvss-color" => self.cvss_color(args),
            _ => Err(unknown_command(self.name(), command)),
        }
    }
}
