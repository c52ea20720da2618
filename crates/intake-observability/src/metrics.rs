//! Metric descriptions and command instrumentation.
//!
//! Collection cycles record their own counters through the `metrics`
//! facade. No exporter is installed here; a recorder set by the embedding
//! process picks them up, otherwise they are no-ops.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};

/// Names of every metric emitted by intake.
pub const METRIC_NAMES: [&str; 7] = [
    "intake_events_emitted_total",
    "intake_malformed_records_total",
    "intake_pages_fetched_total",
    "intake_stream_failures_total",
    "intake_cursor_lag_seconds",
    "intake_commands_total",
    "intake_command_duration_seconds",
];

/// Registers metric descriptions with the installed recorder.
pub fn register_metrics() {
    describe_counter!(
        "intake_events_emitted_total",
        "Total number of events delivered to the sink"
    );
    describe_counter!(
        "intake_malformed_records_total",
        "Records dropped because required fields were missing or unparsable"
    );
    describe_counter!(
        "intake_pages_fetched_total",
        "Total number of vendor pages requested"
    );
    describe_counter!(
        "intake_stream_failures_total",
        "Streams that ended a cycle without completing"
    );

    describe_gauge!(
        "intake_cursor_lag_seconds",
        "Seconds between now and the last persisted watermark"
    );

    describe_counter!(
        "intake_commands_total",
        "Total number of integration commands executed"
    );
    describe_histogram!(
        "intake_command_duration_seconds",
        "Integration command execution duration"
    );
}

/// Records the outcome of one integration command.
pub fn record_command(integration: &str, command: &str, success: bool, duration_secs: f64) {
    let status = if success { "success" } else { "failure" };

    counter!(
        "intake_commands_total",
        "integration" => integration.to_string(),
        "command" => command.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        "intake_command_duration_seconds",
        "integration" => integration.to_string(),
        "command" => command.to_string()
    )
    .record(duration_secs);
}
