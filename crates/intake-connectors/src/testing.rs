//! Testing harness for integration implementations.
//!
//! Provides helper functions to build integrations against a mock server.

use crate::traits::{ConnectorConfig, ConnectorHealth, ConnectorResult, IntegrationContext};
use intake_core::{MemorySink, MemoryStateStore, StateStore};
use std::collections::HashMap;
use std::sync::Arc;

/// Creates a test connector config that does not retry.
pub fn test_connector_config(name: &str, base_url: &str) -> ConnectorConfig {
    ConnectorConfig {
        name: name.to_string(),
        base_url: base_url.to_string(),
        timeout_secs: 5,
        max_retries: 0,
        verify_tls: true,
        headers: HashMap::new(),
    }
}

/// In-memory services for one integration under test.
pub struct TestContext {
    pub store: Arc<MemoryStateStore>,
    pub sink: Arc<MemorySink>,
    pub context: IntegrationContext,
}

/// Creates an integration context backed by an in-memory store and sink.
pub fn test_context(instance: &str) -> TestContext {
    let store = Arc::new(MemoryStateStore::new());
    let sink = Arc::new(MemorySink::new());
    let state: Arc<dyn StateStore> = store.clone();
    let context = IntegrationContext::new(state, sink.clone(), instance);
    TestContext {
        store,
        sink,
        context,
    }
}

/// Asserts that a connector health check returns healthy.
pub fn assert_healthy(result: &ConnectorResult<ConnectorHealth>) {
    match result {
        Ok(ConnectorHealth::Healthy) => {}
        other => panic!("Expected Healthy, got {:?}", other),
    }
}

/// Asserts that a connector health check returns unhealthy.
pub fn assert_unhealthy(result: &ConnectorResult<ConnectorHealth>) {
    match result {
        Ok(ConnectorHealth::Unhealthy(_)) => {}
        other => panic!("Expected Unhealthy, got {:?}", other),
    }
}
