//! Configuration loading for the intake CLI.

use anyhow::{anyhow, Context, Result};
use intake_connectors::{
    collaboration, threat_intel, ConnectorConfig, CveSearchConfig, IronscalesConfig,
    NetskopeConfig, SecureString, TenableScConfig, ZoomConfig,
};
use intake_observability::{LogFormat, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const REDACTED: &str = "***REDACTED***";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where cursors and auth tokens are persisted.
    #[serde(default)]
    pub state_path: Option<PathBuf>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Event sink configuration.
    #[serde(default)]
    pub sink: SinkConfig,

    /// Configured integrations, keyed by instance name.
    #[serde(default)]
    pub integrations: BTreeMap<String, IntegrationConfig>,
}

impl AppConfig {
    /// Loads configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parses YAML and fills in per-instance defaults.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(contents)?;
        for (name, integration) in config.integrations.iter_mut() {
            integration.apply_defaults(name);
        }
        Ok(config)
    }

    /// The state file, falling back to the platform data directory.
    pub fn state_path(&self) -> PathBuf {
        if let Some(path) = &self.state_path {
            return path.clone();
        }
        match directories::ProjectDirs::from("io", "intake", "intake") {
            Some(dirs) => dirs.data_dir().join("state.json"),
            None => PathBuf::from("intake-state.json"),
        }
    }

    /// Looks up an integration by instance name.
    pub fn integration(&self, name: &str) -> Result<&IntegrationConfig> {
        self.integrations.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.integrations.keys().map(String::as_str).collect();
            anyhow!(
                "Integration '{}' is not configured. Configured integrations: {}",
                name,
                if known.is_empty() {
                    "none".to_string()
                } else {
                    known.join(", ")
                }
            )
        })
    }

    /// Creates a copy with secrets redacted.
    pub fn redact_secrets(&self) -> Self {
        let mut config = self.clone();
        for integration in config.integrations.values_mut() {
            integration.redact_secrets();
        }
        config
    }
}

/// Logging section of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log line format.
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

impl LoggingSettings {
    /// Parses the configured level.
    pub fn level(&self) -> Option<tracing::Level> {
        tracing::Level::from_str(&self.level).ok()
    }

    /// Builds the subscriber configuration. `verbose` forces debug output.
    pub fn to_logging_config(&self, verbose: bool) -> LoggingConfig {
        let level = if verbose {
            tracing::Level::DEBUG
        } else {
            self.level().unwrap_or(tracing::Level::INFO)
        };
        LoggingConfig::default()
            .with_level(level)
            .with_format(self.format)
    }
}

/// Where fetched events are written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Append JSON lines to this file instead of stdout.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Vendor tag written on every event, replacing the integration's.
    #[serde(default)]
    pub vendor: Option<String>,

    /// Product tag written on every event, replacing the integration's.
    #[serde(default)]
    pub product: Option<String>,
}

/// One configured integration instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntegrationConfig {
    Netskope(NetskopeConfig),
    Ironscales(IronscalesConfig),
    TenableSc(TenableScConfig),
    CveSearch(CveSearchConfig),
    Zoom(ZoomConfig),
}

impl IntegrationConfig {
    /// The `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            IntegrationConfig::Netskope(_) => "netskope",
            IntegrationConfig::Ironscales(_) => "ironscales",
            IntegrationConfig::TenableSc(_) => "tenable_sc",
            IntegrationConfig::CveSearch(_) => "cve_search",
            IntegrationConfig::Zoom(_) => "zoom",
        }
    }

    pub fn connector(&self) -> &ConnectorConfig {
        match self {
            IntegrationConfig::Netskope(c) => &c.connector,
            IntegrationConfig::Ironscales(c) => &c.connector,
            IntegrationConfig::TenableSc(c) => &c.connector,
            IntegrationConfig::CveSearch(c) => &c.connector,
            IntegrationConfig::Zoom(c) => &c.connector,
        }
    }

    fn connector_mut(&mut self) -> &mut ConnectorConfig {
        match self {
            IntegrationConfig::Netskope(c) => &mut c.connector,
            IntegrationConfig::Ironscales(c) => &mut c.connector,
            IntegrationConfig::TenableSc(c) => &mut c.connector,
            IntegrationConfig::CveSearch(c) => &mut c.connector,
            IntegrationConfig::Zoom(c) => &mut c.connector,
        }
    }

    /// Whether the vendor has a public endpoint used when `base_url` is unset.
    pub fn has_default_base_url(&self) -> bool {
        matches!(
            self,
            IntegrationConfig::CveSearch(_) | IntegrationConfig::Zoom(_)
        )
    }

    /// Names the instance after its map key and fills public endpoints.
    pub fn apply_defaults(&mut self, name: &str) {
        let default_url = match self {
            IntegrationConfig::CveSearch(_) => Some(threat_intel::cve_search::DEFAULT_BASE_URL),
            IntegrationConfig::Zoom(_) => Some(collaboration::zoom::DEFAULT_BASE_URL),
            _ => None,
        };
        let connector = self.connector_mut();
        if connector.name.is_empty() {
            connector.name = name.to_string();
        }
        if connector.base_url.is_empty() {
            if let Some(url) = default_url {
                connector.base_url = url.to_string();
            }
        }
    }

    fn redact_secrets(&mut self) {
        match self {
            IntegrationConfig::Netskope(c) => redact(&mut c.api_token),
            IntegrationConfig::Ironscales(c) => redact(&mut c.api_key),
            IntegrationConfig::TenableSc(c) => {
                for secret in [&mut c.access_key, &mut c.secret_key, &mut c.password]
                    .into_iter()
                    .flatten()
                {
                    redact(secret);
                }
            }
            IntegrationConfig::CveSearch(_) => {}
            IntegrationConfig::Zoom(c) => redact(&mut c.client_secret),
        }
    }
}

fn redact(secret: &mut SecureString) {
    if !secret.is_empty() {
        *secret = SecureString::from(REDACTED);
    }
}
