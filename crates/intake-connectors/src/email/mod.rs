//! Email security connectors.

pub mod ironscales;

pub use ironscales::{IronscalesConfig, IronscalesConnector, IronscalesState};
