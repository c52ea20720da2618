//! Vulnerability management connectors.

pub mod tenable_sc;

pub use tenable_sc::{TenableAlertFetcher, TenableCredentials, TenableScConfig, TenableScConnector};
