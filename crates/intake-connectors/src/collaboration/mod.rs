//! Collaboration platform connectors.

pub mod zoom;

pub use zoom::{ZoomConfig, ZoomConnector};
