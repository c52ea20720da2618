//! Cloud security connectors.

pub mod netskope;

pub use netskope::{ApiVersion, NetskopeConfig, NetskopeConnector, NetskopeFetcher};
