//! Threat intelligence connectors.

pub mod cve_search;
pub mod cvss;

pub use cve_search::{CveContext, CveIndicator, CveSearchConfig, CveSearchConnector};
pub use cvss::cvss_color;
