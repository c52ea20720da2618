//! # intake-connectors
//!
//! Vendor integrations for event collection, vulnerability management,
//! threat intel lookups and collaboration platform administration.
//!
//! This crate provides the integration traits, the shared HTTP client with its
//! pluggable authentication strategies, and one connector per vendor. Event
//! collectors drive the `intake-core` cursor protocol.

pub mod args;
pub mod auth;
pub mod cloud;
pub mod collaboration;
pub mod command;
pub mod email;
pub mod http;
pub mod secure_string;
pub mod testing;
pub mod threat_intel;
pub mod traits;
pub mod vulnerability;

pub use args::RawArgs;
pub use auth::{
    AuthState, AuthStrategy, HeaderAuth, JwtExchangeAuth, NoAuth, OAuth2Auth, QueryTokenAuth,
    SessionLoginAuth, TokenCache,
};
pub use command::CommandOutput;
pub use http::{ApiRequest, HttpClient, RateLimitConfig, ResponseCache};
pub use secure_string::SecureString;
pub use traits::{
    Connector, ConnectorCategory, ConnectorConfig, ConnectorError, ConnectorHealth,
    ConnectorResult, FetchSummary, Integration, IntegrationContext,
};

// Re-export connector implementations
pub use cloud::{NetskopeConfig, NetskopeConnector};
pub use collaboration::{ZoomConfig, ZoomConnector};
pub use email::{IronscalesConfig, IronscalesConnector};
pub use threat_intel::{CveSearchConfig, CveSearchConnector};
pub use vulnerability::{TenableScConfig, TenableScConnector};
