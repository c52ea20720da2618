//! # intake-observability
//!
//! Logging and metrics infrastructure for intake.
//!
//! This crate provides structured logging with tracing and the descriptions
//! of the collection metrics emitted by the other crates.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, init_logging_with_config, LogFormat, LoggingConfig};
pub use metrics::{record_command, register_metrics, METRIC_NAMES};
