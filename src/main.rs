//! Binary entry point for switchboard.
//!
//! This binary provides the CLI over the switchboard library. Every command
//! prints JSON to stdout; logs go to stderr.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

mod commands;

use clap::{Parser, Subcommand};
use commands::{PrefsAction, RequestFlags, SourcesAction};
use std::path::PathBuf;
use std::process::ExitCode;
use switchboard::observability::{self, InitOptions};
use switchboard::{ServiceContainer, SwitchboardConfig};

/// Switchboard - routes free-text requests to registered capabilities.
#[derive(Parser)]
#[command(name = "switchboard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "SWITCHBOARD_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Capability definition file (overrides the config file).
    #[arg(long, global = true)]
    capabilities: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for a request.
    Process {
        /// The request text.
        request: String,

        #[command(flatten)]
        flags: RequestFlags,
    },

    /// Score a request against the capability index.
    Analyze {
        /// The request text.
        request: String,
    },

    /// List registered capabilities.
    Capabilities {
        /// Only this kind: node, workflow, tool or service.
        #[arg(short, long)]
        kind: Option<String>,

        /// Substring to search names, descriptions and triggers for.
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Store a memory record.
    Remember {
        /// Record category.
        category: String,

        /// Content; parsed as JSON when valid, stored as a string otherwise.
        content: String,

        /// Tags (comma-separated).
        #[arg(short, long)]
        tags: Option<String>,

        /// Producer of the record.
        #[arg(short, long, default_value = "cli")]
        source: String,
    },

    /// Fetch a memory record by id.
    Recall {
        /// Record id.
        id: String,
    },

    /// Query memory records.
    Query {
        /// Filter by category.
        #[arg(short, long)]
        category: Option<String>,

        /// Filter by tags (comma-separated, any-of).
        #[arg(short, long)]
        tags: Option<String>,

        /// Filter by source.
        #[arg(short, long)]
        source: Option<String>,

        /// Maximum number of results.
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Manage preferences.
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },

    /// Manage external sources.
    Sources {
        #[command(subcommand)]
        action: SourcesAction,
    },

    /// Sample health once and print the summary.
    Health,

    /// Print aggregate statistics.
    Stats,

    /// Rebuild the memory indexes from storage.
    Reindex,

    /// Delete memory records older than a number of days.
    Rotate {
        /// Age threshold in days.
        #[arg(short, long, default_value = "30")]
        days: u32,

        /// Only rotate this category.
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Run the periodic monitor until interrupted.
    Monitor,
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref(), cli.capabilities.clone()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let expose_metrics = matches!(cli.command, Commands::Monitor);
    let _observability = match observability::init_from_config(
        &config.observability,
        InitOptions {
            verbose: cli.verbose,
            metrics_expose: expose_metrics,
        },
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(
    command: Commands,
    config: &SwitchboardConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let services = ServiceContainer::from_config(config)?;

    match command {
        Commands::Process { request, flags } => {
            commands::cmd_process(&services, &request, flags).await
        },
        Commands::Analyze { request } => commands::cmd_analyze(&services, &request),
        Commands::Capabilities { kind, search } => {
            commands::cmd_capabilities(&services, kind, search)
        },
        Commands::Remember {
            category,
            content,
            tags,
            source,
        } => commands::cmd_remember(&services, &category, &content, tags, &source),
        Commands::Recall { id } => commands::cmd_recall(&services, &id),
        Commands::Query {
            category,
            tags,
            source,
            limit,
        } => commands::cmd_query(&services, category, tags, source, limit),
        Commands::Prefs { action } => commands::cmd_prefs(&services, action),
        Commands::Sources { action } => commands::cmd_sources(&services, action),
        Commands::Health => commands::cmd_health(&services),
        Commands::Stats => commands::cmd_stats(&services),
        Commands::Reindex => commands::cmd_reindex(&services),
        Commands::Rotate { days, category } => {
            commands::cmd_rotate(&services, days, category.as_deref())
        },
        Commands::Monitor => commands::cmd_monitor(&services).await,
    }
}

/// Loads configuration: explicit path, else the default location, then
/// `SWITCHBOARD_*` overrides and the `--capabilities` flag.
fn load_config(
    path: Option<&std::path::Path>,
    capabilities: Option<PathBuf>,
) -> Result<SwitchboardConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => SwitchboardConfig::load_from_file(path)?,
        None => SwitchboardConfig::load_default(),
    };
    let config = config.with_env_overrides();

    Ok(match capabilities {
        Some(path) => config.with_capabilities(path),
        None => config,
    })
}
