//! Connector trait definitions for intake.
//!
//! This module defines the interfaces every vendor integration implements and
//! the error type shared by the HTTP plumbing and the integrations.

use crate::args::RawArgs;
use crate::command::CommandOutput;
use async_trait::async_trait;
use intake_core::{
    CollectorError, CycleReport, EventSink, FetchError, SinkError, StateStore, StoreError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur in connectors.
#[derive(Error, Debug, Clone)]
pub enum ConnectorError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

impl From<ConnectorError> for FetchError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::Timeout(_)
            | ConnectorError::RateLimited(_)
            | ConnectorError::ServerError(_) => FetchError::Transient(err.to_string()),
            ConnectorError::ConnectionFailed(_)
            | ConnectorError::AuthenticationFailed(_)
            | ConnectorError::AuthorizationDenied(_) => FetchError::Connection(err.to_string()),
            _ => FetchError::Fatal(err.to_string()),
        }
    }
}

impl From<FetchError> for ConnectorError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Transient(msg) => ConnectorError::ServerError(msg),
            FetchError::Connection(msg) => ConnectorError::ConnectionFailed(msg),
            FetchError::Fatal(msg) => ConnectorError::RequestFailed(msg),
        }
    }
}

impl From<StoreError> for ConnectorError {
    fn from(err: StoreError) -> Self {
        ConnectorError::Internal(err.to_string())
    }
}

impl From<SinkError> for ConnectorError {
    fn from(err: SinkError) -> Self {
        ConnectorError::Internal(err.to_string())
    }
}

impl From<CollectorError> for ConnectorError {
    fn from(err: CollectorError) -> Self {
        match err {
            CollectorError::CycleFailed { message } => ConnectorError::RequestFailed(message),
            CollectorError::Fetch(e) => e.into(),
            CollectorError::Store(e) => e.into(),
            CollectorError::Sink(e) => e.into(),
        }
    }
}

/// Health status of a connector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorHealth {
    /// Connector is healthy and operational.
    Healthy,
    /// Connector is degraded but still functional.
    Degraded(String),
    /// Connector is unhealthy and not operational.
    Unhealthy(String),
    /// Health status is unknown.
    Unknown,
}

/// HTTP settings shared by every integration.
///
/// Credentials are not part of this struct: each integration builds its own
/// [`AuthStrategy`](crate::auth::AuthStrategy) from its vendor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Instance name, also used to namespace persisted state.
    #[serde(default)]
    pub name: String,
    /// Base URL for the API.
    #[serde(default)]
    pub base_url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Maximum retries for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Whether to verify TLS certificates. Ignored in release builds.
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
    /// Additional headers to include.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_verify_tls() -> bool {
    true
}

impl ConnectorConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            verify_tls: default_verify_tls(),
            headers: HashMap::new(),
        }
    }

    /// Returns a copy pointing at a different base URL.
    pub fn with_base_url(&self, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..self.clone()
        }
    }
}

/// Connector category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorCategory {
    Cloud,
    Email,
    Vulnerability,
    ThreatIntel,
    Collaboration,
}

impl fmt::Display for ConnectorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectorCategory::Cloud => "cloud",
            ConnectorCategory::Email => "email",
            ConnectorCategory::Vulnerability => "vulnerability",
            ConnectorCategory::ThreatIntel => "threat_intel",
            ConnectorCategory::Collaboration => "collaboration",
        };
        f.write_str(s)
    }
}

/// Base trait for all connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns the connector name.
    fn name(&self) -> &str;

    /// Returns the connector type (e.g., "cloud", "email").
    fn connector_type(&self) -> &str;

    /// Returns the connector category.
    fn category(&self) -> ConnectorCategory {
        match self.connector_type() {
            "email" => ConnectorCategory::Email,
            "vulnerability" => ConnectorCategory::Vulnerability,
            "threat_intel" => ConnectorCategory::ThreatIntel,
            "collaboration" => ConnectorCategory::Collaboration,
            _ => ConnectorCategory::Cloud,
        }
    }

    /// Returns the capabilities this connector provides.
    fn capabilities(&self) -> Vec<String> {
        vec!["health_check".to_string(), "test_connection".to_string()]
    }

    /// Checks the health of the connector.
    async fn health_check(&self) -> ConnectorResult<ConnectorHealth>;

    /// Tests the connection to the external system.
    async fn test_connection(&self) -> ConnectorResult<bool>;
}

/// Host-provided services an integration is constructed with.
#[derive(Clone)]
pub struct IntegrationContext {
    /// Persisted per-instance state: cursors and auth tokens.
    pub state: Arc<dyn StateStore>,
    /// Where fetched events and incidents are delivered.
    pub sink: Arc<dyn EventSink>,
    /// Instance name used to namespace state keys.
    pub instance: String,
}

impl IntegrationContext {
    pub fn new(
        state: Arc<dyn StateStore>,
        sink: Arc<dyn EventSink>,
        instance: impl Into<String>,
    ) -> Self {
        Self {
            state,
            sink,
            instance: instance.into(),
        }
    }

    /// Builds a state key scoped to this instance.
    pub fn state_key(&self, kind: &str) -> String {
        format!("{}:{}", kind, self.instance)
    }
}

impl fmt::Debug for IntegrationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrationContext")
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

/// Result of one scheduled fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchSummary {
    /// Events or incidents delivered to the sink.
    pub delivered: usize,
    /// Per-stream details for collector-driven integrations.
    pub report: Option<CycleReport>,
}

impl FetchSummary {
    pub fn delivered(delivered: usize) -> Self {
        Self {
            delivered,
            report: None,
        }
    }

    /// The consolidated failure message, if any stream did not complete.
    pub fn failure_message(&self) -> Option<String> {
        self.report.as_ref().and_then(CycleReport::failure_message)
    }
}

/// A vendor integration driven by the host through named commands.
#[async_trait]
pub trait Integration: Connector {
    /// Commands answered by [`Integration::execute`], besides `test-module`.
    fn commands(&self) -> &'static [&'static str];

    /// Runs one named command.
    async fn execute(&self, command: &str, args: &RawArgs) -> ConnectorResult<CommandOutput>;

    /// Runs one scheduled fetch and persists the new position.
    async fn fetch(&self) -> ConnectorResult<FetchSummary> {
        Err(ConnectorError::InvalidRequest(format!(
            "{} does not fetch events",
            self.name()
        )))
    }

    /// Releases any server-side session. Called once the host is done.
    async fn close(&self) -> ConnectorResult<()> {
        Ok(())
    }
}

/// Error for a command name the integration does not know.
pub fn unknown_command(integration: &str, command: &str) -> ConnectorError {
    ConnectorError::InvalidRequest(format!(
        "Command '{}' is not implemented by {}",
        command, integration
    ))
}
