//! Configuration validation for intake.
//!
//! Checks everything that can be checked without contacting a vendor, so a
//! broken config fails before the first scheduled fetch rather than during it.

use crate::config::{AppConfig, IntegrationConfig};
use colored::Colorize;
use intake_connectors::http::can_disable_tls_verification;
use intake_connectors::SecureString;
use intake_core::parse_first_fetch;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Critical errors that make the config unusable.
    pub errors: Vec<String>,
    /// Warnings that should be addressed but don't block a run.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Prints the validation result to the console.
    pub fn print(&self) {
        if !self.warnings.is_empty() {
            println!();
            println!("{}", "Configuration Warnings:".yellow().bold());
            for warning in &self.warnings {
                println!("  {} {}", "⚠".yellow(), warning);
            }
        }

        if !self.errors.is_empty() {
            println!();
            println!("{}", "Configuration Errors:".red().bold());
            for error in &self.errors {
                println!("  {} {}", "✗".red(), error);
            }
        }

        if self.errors.is_empty() && self.warnings.is_empty() {
            println!("  {} Configuration OK", "✓".green());
        }
    }
}

/// Validates application configuration before a run.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &AppConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        Self::validate_logging(config, &mut result);
        Self::validate_sink(config, &mut result);

        if config.integrations.is_empty() {
            result.add_warning("No integrations configured. Add entries under `integrations:`.");
        }
        for (name, integration) in &config.integrations {
            Self::validate_connection(name, integration, &mut result);
            Self::validate_integration(name, integration, &mut result);
        }

        result
    }

    fn validate_logging(config: &AppConfig, result: &mut ValidationResult) {
        if config.logging.level().is_none() {
            result.add_error(format!(
                "Invalid logging.level '{}'. Must be one of: trace, debug, info, warn, error",
                config.logging.level
            ));
        }
    }

    fn validate_sink(config: &AppConfig, result: &mut ValidationResult) {
        if let Some(parent) = config.sink.path.as_ref().and_then(|p| p.parent()) {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                result.add_error(format!(
                    "Event file directory does not exist: {}",
                    parent.display()
                ));
            }
        }
    }

    /// Checks the HTTP settings shared by every integration.
    fn validate_connection(name: &str, integration: &IntegrationConfig, result: &mut ValidationResult) {
        let connector = integration.connector();
        let url = connector.base_url.as_str();

        if url.is_empty() {
            result.add_error(format!(
                "Integration '{}': {} requires base_url",
                name,
                integration.kind()
            ));
        } else if url.starts_with("http://") {
            result.add_warning(format!(
                "Integration '{}': base_url uses plain HTTP. Credentials will be sent unencrypted.",
                name
            ));
        } else if !url.starts_with("https://") {
            result.add_error(format!(
                "Integration '{}': Invalid base_url '{}'. Must start with https://",
                name, url
            ));
        }

        if connector.timeout_secs == 0 {
            result.add_error(format!("Integration '{}': timeout_secs must be positive", name));
        }

        if !connector.verify_tls {
            let effect = if can_disable_tls_verification() {
                "Certificates will not be checked."
            } else {
                "Release builds ignore it and still check certificates."
            };
            result.add_warning(format!(
                "Integration '{}': verify_tls is disabled. {}",
                name, effect
            ));
        }
    }

    /// Checks vendor-specific settings.
    fn validate_integration(name: &str, integration: &IntegrationConfig, result: &mut ValidationResult) {
        match integration {
            IntegrationConfig::Netskope(c) => {
                require_secret(name, "api_token", &c.api_token, result);
                validate_fetch(name, &c.first_fetch, c.max_fetch, result);
            }
            IntegrationConfig::Ironscales(c) => {
                if c.company_id.trim().is_empty() {
                    result.add_error(format!("Integration '{}': company_id is required", name));
                }
                require_secret(name, "api_key", &c.api_key, result);
                if c.scopes.is_empty() {
                    result.add_warning(format!(
                        "Integration '{}': No scopes configured. The token exchange will request none.",
                        name
                    ));
                }
                validate_fetch(name, &c.first_fetch, c.max_fetch, result);
            }
            IntegrationConfig::TenableSc(c) => {
                if let Err(e) = c.credentials() {
                    result.add_error(format!("Integration '{}': {}", name, e));
                }
                validate_fetch(name, &c.first_fetch, c.max_fetch, result);
            }
            IntegrationConfig::CveSearch(c) => {
                if c.requests_per_minute == 0 {
                    result.add_error(format!(
                        "Integration '{}': requests_per_minute must be positive",
                        name
                    ));
                }
                if c.cache_ttl_secs == 0 {
                    result.add_warning(format!(
                        "Integration '{}': cache_ttl_secs is 0. Every lookup will hit the API.",
                        name
                    ));
                }
            }
            IntegrationConfig::Zoom(c) => {
                if c.account_id.trim().is_empty() {
                    result.add_error(format!("Integration '{}': account_id is required", name));
                }
                if c.client_id.trim().is_empty() {
                    result.add_error(format!("Integration '{}': client_id is required", name));
                }
                require_secret(name, "client_secret", &c.client_secret, result);
            }
        }
    }
}

fn require_secret(name: &str, field: &str, secret: &SecureString, result: &mut ValidationResult) {
    if secret.is_blank() {
        result.add_error(format!("Integration '{}': {} is required", name, field));
    }
}

fn validate_fetch(name: &str, first_fetch: &str, max_fetch: usize, result: &mut ValidationResult) {
    if parse_first_fetch(first_fetch, chrono::Utc::now()).is_err() {
        result.add_error(format!(
            "Integration '{}': Invalid first_fetch '{}'. Use e.g. '3 days' or an ISO 8601 time.",
            name, first_fetch
        ));
    }
    if max_fetch == 0 {
        result.add_error(format!("Integration '{}': max_fetch must be positive", name));
    }
}
