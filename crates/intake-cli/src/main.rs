//! intake CLI
//!
//! Command-line host for vendor integrations: scheduled event fetches,
//! event previews and query commands.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use intake_connectors::{CommandOutput, FetchSummary, Integration, IntegrationContext, RawArgs};
use intake_core::{FileStateStore, StreamOutcome};
use intake_observability::{command_span, stream_span};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn, Instrument};

mod config;
mod registry;
mod sink;
mod validator;

use config::AppConfig;
use registry::{build_integration, get_events_command};
use sink::JsonLinesSink;
use validator::ConfigValidator;

#[derive(Parser)]
#[command(name = "intake")]
#[command(version)]
#[command(about = "Incremental event collection and queries for security vendor APIs", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid output format: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one collection cycle and persist the new cursor
    Fetch {
        /// Integration instance name
        integration: String,
    },

    /// Preview events without advancing the cursor
    GetEvents {
        /// Integration instance name
        integration: String,

        /// Command argument as KEY=VALUE (repeatable)
        #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        args: Vec<(String, String)>,
    },

    /// Run a query command
    Run {
        /// Integration instance name
        integration: String,

        /// Command name, e.g. zoom-list-users
        command: String,

        /// Command argument as KEY=VALUE (repeatable)
        #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        args: Vec<(String, String)>,
    },

    /// Test connectivity and credentials
    Test {
        /// Integration instance name
        integration: String,
    },

    /// Validate configuration
    Validate {
        /// Configuration file to validate
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show current configuration
    Config {
        /// Show secrets (redacted by default)
        #[arg(long)]
        show_secrets: bool,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{}`", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    if let Commands::Validate { config } = &cli.command {
        return cmd_validate(config.clone().unwrap_or(config_path));
    }

    let config = if config_path.exists() {
        AppConfig::load(&config_path)?
    } else {
        if cli.verbose {
            eprintln!("Using default configuration (no config file found)");
        }
        AppConfig::default()
    };

    intake_observability::init_logging_with_config(config.logging.to_logging_config(cli.verbose));
    intake_observability::register_metrics();

    match cli.command {
        Commands::Fetch { integration } => cmd_fetch(&config, &integration, cli.format).await,
        Commands::GetEvents { integration, args } => {
            cmd_get_events(&config, &integration, args, cli.format).await
        }
        Commands::Run {
            integration,
            command,
            args,
        } => cmd_run(&config, &integration, &command, args, cli.format).await,
        Commands::Test { integration } => cmd_test(&config, &integration, cli.format).await,
        Commands::Config { show_secrets } => cmd_config(&config, show_secrets, cli.format),
        Commands::Validate { .. } => Ok(()),
    }
}

fn default_config_path() -> PathBuf {
    if let Some(dirs) = directories::ProjectDirs::from("io", "intake", "intake") {
        dirs.config_dir().join("config.yaml")
    } else {
        PathBuf::from("intake.yaml")
    }
}

/// Builds a configured integration wired to the file store and event sink.
fn open_integration(config: &AppConfig, name: &str) -> Result<Box<dyn Integration>> {
    let integration_config = config.integration(name)?;
    let state = Arc::new(FileStateStore::new(config.state_path()));
    let sink = Arc::new(JsonLinesSink::open(&config.sink)?);
    let ctx = IntegrationContext::new(state, sink, name);

    build_integration(integration_config, ctx)
        .with_context(|| format!("Failed to initialize integration '{}'", name))
}

async fn close(integration: &dyn Integration) {
    if let Err(e) = integration.close().await {
        warn!(integration = integration.name(), error = %e, "Failed to release session");
    }
}

async fn cmd_fetch(config: &AppConfig, name: &str, format: OutputFormat) -> Result<()> {
    let integration = open_integration(config, name)?;

    let started = Instant::now();
    let result = integration
        .fetch()
        .instrument(command_span!(name, "fetch"))
        .await;
    close(integration.as_ref()).await;

    let failure = match &result {
        Ok(summary) => summary.failure_message(),
        Err(e) => Some(e.to_string()),
    };
    intake_observability::record_command(
        name,
        "fetch",
        failure.is_none(),
        started.elapsed().as_secs_f64(),
    );

    let summary = result.with_context(|| format!("Fetch failed for '{}'", name))?;
    report_fetch(name, &summary, format)?;

    match summary.failure_message() {
        Some(message) => bail!(message),
        None => Ok(()),
    }
}

fn outcome_label(outcome: &StreamOutcome) -> String {
    match outcome {
        StreamOutcome::Completed(_) => "completed".to_string(),
        StreamOutcome::Partial(e) => format!("partial: {}", e),
        StreamOutcome::Failed(message) => format!("failed: {}", message),
        StreamOutcome::Skipped => "skipped".to_string(),
    }
}

/// Writes the cycle summary to stderr; stdout may carry the events.
fn report_fetch(name: &str, summary: &FetchSummary, format: OutputFormat) -> Result<()> {
    let streams = summary
        .report
        .as_ref()
        .map(|r| r.streams.as_slice())
        .unwrap_or_default();

    for stream in streams {
        let _span = stream_span!(name, stream.stream).entered();
        if stream.outcome.is_success() {
            info!(emitted = stream.emitted, pages = stream.pages, "Stream completed");
        } else {
            warn!(outcome = %outcome_label(&stream.outcome), "Stream did not complete");
        }
    }

    if format == OutputFormat::Json {
        let streams: Vec<_> = streams
            .iter()
            .map(|s| {
                json!({
                    "stream": s.stream.as_str(),
                    "emitted": s.emitted,
                    "malformed": s.malformed,
                    "pages": s.pages,
                    "outcome": outcome_label(&s.outcome),
                })
            })
            .collect();
        let report = json!({
            "integration": name,
            "delivered": summary.delivered,
            "streams": streams,
            "error": summary.failure_message(),
        });
        eprintln!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    eprintln!(
        "{} {} events from {}",
        "Fetched".green().bold(),
        summary.delivered,
        name.cyan()
    );
    for stream in streams {
        let outcome = if stream.outcome.is_success() {
            outcome_label(&stream.outcome).green()
        } else {
            outcome_label(&stream.outcome).red()
        };
        eprintln!(
            "  {}: {} events, {} pages, {} malformed [{}]",
            stream.stream.as_str(),
            stream.emitted,
            stream.pages,
            stream.malformed,
            outcome
        );
    }
    Ok(())
}

async fn cmd_get_events(
    config: &AppConfig,
    name: &str,
    args: Vec<(String, String)>,
    format: OutputFormat,
) -> Result<()> {
    let integration = open_integration(config, name)?;
    let Some(command) = get_events_command(integration.as_ref()) else {
        close(integration.as_ref()).await;
        bail!(
            "Integration '{}' ({}) does not collect events",
            name,
            integration.connector_type()
        );
    };
    run_command(integration.as_ref(), name, command, args, format).await
}

async fn cmd_run(
    config: &AppConfig,
    name: &str,
    command: &str,
    args: Vec<(String, String)>,
    format: OutputFormat,
) -> Result<()> {
    let integration = open_integration(config, name)?;
    if !integration.commands().contains(&command) {
        let available = integration.commands().join(", ");
        close(integration.as_ref()).await;
        bail!(
            "Unknown command '{}' for '{}'. Available commands: {}",
            command,
            name,
            available
        );
    }
    run_command(integration.as_ref(), name, command, args, format).await
}

async fn run_command(
    integration: &dyn Integration,
    name: &str,
    command: &str,
    args: Vec<(String, String)>,
    format: OutputFormat,
) -> Result<()> {
    let args: RawArgs = args.into_iter().collect();

    let started = Instant::now();
    let result = integration
        .execute(command, &args)
        .instrument(command_span!(name, command))
        .await;
    close(integration).await;
    intake_observability::record_command(
        name,
        command,
        result.is_ok(),
        started.elapsed().as_secs_f64(),
    );

    let output = result.with_context(|| format!("Command '{}' failed for '{}'", command, name))?;
    print_output(&output, format)
}

fn print_output(output: &CommandOutput, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(output)?),
        OutputFormat::Text => println!("{}", output.readable),
    }
    Ok(())
}

async fn cmd_test(config: &AppConfig, name: &str, format: OutputFormat) -> Result<()> {
    let integration = open_integration(config, name)?;

    let result = integration
        .test_connection()
        .instrument(command_span!(name, "test-module"))
        .await;
    close(integration.as_ref()).await;

    let error = match &result {
        Ok(true) => None,
        Ok(false) => Some("connection test returned a failure".to_string()),
        Err(e) => Some(e.to_string()),
    };

    if format == OutputFormat::Json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "integration": name,
                "ok": error.is_none(),
                "error": error,
            }))?
        );
    } else if error.is_none() {
        println!("  {} {}: ok", "✓".green(), name.cyan());
    }

    match error {
        Some(message) => Err(anyhow!(message)).with_context(|| format!("Test failed for '{}'", name)),
        None => Ok(()),
    }
}

fn cmd_validate(config_path: PathBuf) -> Result<()> {
    println!(
        "Validating configuration: {}",
        config_path.display().to_string().cyan()
    );

    let config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("{}: {:#}", "Configuration file error".red().bold(), e);
            std::process::exit(1);
        }
    };

    let validation_result = ConfigValidator::validate(&config);
    validation_result.print();

    println!();
    println!("{}", "Configuration Summary".bold());
    println!("─────────────────────");
    println!("  State: {}", config.state_path().display());
    println!("  Integrations: {}", config.integrations.len());
    for (name, integration) in &config.integrations {
        println!("    - {} ({})", name, integration.kind());
    }

    if validation_result.has_errors() {
        println!();
        println!(
            "{}",
            "Configuration validation failed. Fix the errors above."
                .red()
                .bold()
        );
        std::process::exit(1);
    } else if validation_result.has_warnings() {
        println!();
        println!(
            "{}",
            "Configuration is valid with warnings. Review the warnings above."
                .yellow()
                .bold()
        );
    } else {
        println!();
        println!("{}", "Configuration is valid.".green().bold());
    }

    Ok(())
}

fn cmd_config(config: &AppConfig, show_secrets: bool, format: OutputFormat) -> Result<()> {
    let display_config = if show_secrets {
        config.clone()
    } else {
        config.redact_secrets()
    };

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&display_config)?);
        return Ok(());
    }

    println!("{}", "Current Configuration".bold());
    println!("─────────────────────────");
    println!("State: {}", display_config.state_path().display());
    match &display_config.sink.path {
        Some(path) => println!("Events: {}", path.display()),
        None => println!("Events: stdout"),
    }
    println!(
        "Logging: {} ({:?})",
        display_config.logging.level, display_config.logging.format
    );
    println!("\nIntegrations:");
    for (name, integration) in &display_config.integrations {
        println!(
            "  - {}: {} ({})",
            name.cyan(),
            integration.kind(),
            integration.connector().base_url
        );
    }
    if show_secrets {
        println!("\n{}", serde_yaml::to_string(&display_config.integrations)?);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use intake_core::{FetchError, Termination};

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("limit=10").unwrap(),
            ("limit".to_string(), "10".to_string())
        );
        assert_eq!(
            parse_key_val("query=a=b").unwrap(),
            ("query".to_string(), "a=b".to_string())
        );
        assert_eq!(
            parse_key_val("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
        assert!(parse_key_val("limit").is_err());
        assert!(parse_key_val("=10").is_err());
    }

    #[test]
    fn test_run_command_args() {
        let cli = Cli::try_parse_from([
            "intake",
            "--format",
            "json",
            "run",
            "zoom",
            "zoom-list-users",
            "--arg",
            "limit=5",
            "--arg",
            "status=active",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Run {
                integration,
                command,
                args,
            } => {
                assert_eq!(integration, "zoom");
                assert_eq!(command, "zoom-list-users");
                assert_eq!(args.len(), 2);
                assert_eq!(args[1], ("status".to_string(), "active".to_string()));
            }
            _ => panic!("Expected run"),
        }
    }

    #[test]
    fn test_invalid_format_rejected() {
        assert!(Cli::try_parse_from(["intake", "--format", "xml", "fetch", "ns"]).is_err());
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(
            outcome_label(&StreamOutcome::Completed(Termination::Exhausted)),
            "completed"
        );
        assert_eq!(outcome_label(&StreamOutcome::Skipped), "skipped");
        assert!(
            outcome_label(&StreamOutcome::Partial(FetchError::Transient("503".to_string())))
                .starts_with("partial: ")
        );
        assert_eq!(
            outcome_label(&StreamOutcome::Failed("bad request".to_string())),
            "failed: bad request"
        );
    }
}
