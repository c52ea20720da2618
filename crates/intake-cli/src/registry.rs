//! Builds integrations from their configuration.

use crate::config::IntegrationConfig;
use intake_connectors::{
    ConnectorResult, CveSearchConnector, Integration, IntegrationContext, IronscalesConnector,
    NetskopeConnector, TenableScConnector, ZoomConnector,
};

/// Constructs the integration an instance config describes.
pub fn build_integration(
    config: &IntegrationConfig,
    ctx: IntegrationContext,
) -> ConnectorResult<Box<dyn Integration>> {
    let integration: Box<dyn Integration> = match config {
        IntegrationConfig::Netskope(c) => Box::new(NetskopeConnector::new(c.clone(), ctx)?),
        IntegrationConfig::Ironscales(c) => Box::new(IronscalesConnector::new(c.clone(), ctx)?),
        IntegrationConfig::TenableSc(c) => Box::new(TenableScConnector::new(c.clone(), ctx)?),
        IntegrationConfig::CveSearch(c) => Box::new(CveSearchConnector::new(c.clone())?),
        IntegrationConfig::Zoom(c) => Box::new(ZoomConnector::new(c.clone(), ctx)?),
    };
    Ok(integration)
}

/// The command that previews events without advancing the cursor.
pub fn get_events_command(integration: &dyn Integration) -> Option<&'static str> {
    integration
        .commands()
        .iter()
        .copied()
        .find(|c| c.ends_with("-get-events"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use intake_connectors::RawArgs;
    use intake_core::{MemorySink, MemoryStateStore};
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context(name: &str) -> IntegrationContext {
        IntegrationContext::new(
            Arc::new(MemoryStateStore::new()),
            Arc::new(MemorySink::new()),
            name,
        )
    }

    const CONFIG: &str = r#"
integrations:
  ns:
    type: netskope
    base_url: https://tenant.goskope.com
    api_token: t
  iron:
    type: ironscales
    base_url: https://appapi.ironscales.com
    company_id: acme
    api_key: k
  cve:
    type: cve_search
  zoom:
    type: zoom
    account_id: a
    client_id: c
    client_secret: s
"#;

    #[test]
    fn test_builds_every_configured_integration() {
        let config = AppConfig::parse(CONFIG).unwrap();
        for (name, integration) in &config.integrations {
            let built = build_integration(integration, context(name)).unwrap();
            assert_eq!(built.name(), name.as_str());
        }
    }

    #[test]
    fn test_get_events_command_lookup() {
        let config = AppConfig::parse(CONFIG).unwrap();

        let ns = build_integration(config.integration("ns").unwrap(), context("ns")).unwrap();
        assert_eq!(get_events_command(ns.as_ref()), Some("netskope-get-events"));

        let iron =
            build_integration(config.integration("iron").unwrap(), context("iron")).unwrap();
        assert_eq!(
            get_events_command(iron.as_ref()),
            Some("ironscales-get-events")
        );

        let cve = build_integration(config.integration("cve").unwrap(), context("cve")).unwrap();
        assert_eq!(get_events_command(cve.as_ref()), None);
    }

    #[tokio::test]
    async fn test_built_integration_runs_commands() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/last/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let yaml = format!(
            "integrations:\n  cve:\n    type: cve_search\n    base_url: {}/api/\n",
            server.uri()
        );
        let config = AppConfig::parse(&yaml).unwrap();
        let cve = build_integration(config.integration("cve").unwrap(), context("cve")).unwrap();

        let output = cve
            .execute("cve-latest", &RawArgs::new().with("limit", "1"))
            .await
            .unwrap();
        assert_eq!(output.readable, "No results found");
    }
}
