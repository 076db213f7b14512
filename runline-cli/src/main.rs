//! runline CLI: inspect, resolve, and simulate training run lineages.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// runline: lineage manager for resumable training runs
#[derive(Parser, Debug)]
#[command(
    name = "runline",
    version,
    about,
    long_about = None,
    after_help = "Every command except `resolve` also appends JSON logs to a daily \
                  runline.log under the platform data directory."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Show which run directory a config would use, without writing anything
    Resolve {
        /// Run configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the lineage tree under a timestamp directory
    Tree {
        /// `<checkpoint_root>/<test_name>/<timestamp>` directory
        dir: PathBuf,
        /// Emit JSON instead of an indented listing
        #[arg(long)]
        json: bool,
    },
    /// Summarize the checkpoints and log of one run directory
    Inspect {
        /// A run's `orig` directory
        run_dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the progress log of one run directory
    Log {
        /// A run's `orig` directory
        run_dir: PathBuf,
    },
    /// Manage run configuration files
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Drive a run end to end with synthetic metrics
    Simulate {
        /// Run configuration file
        #[arg(short, long)]
        config: PathBuf,
        /// Stop after this many epochs (default: run to total_epochs)
        #[arg(short, long)]
        epochs: Option<u64>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default run configuration
    Init {
        /// Destination (default: ./runline.toml)
        path: Option<PathBuf>,
    },
    /// Show the effective configuration after env overrides
    Show {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let (json_layer, _guard) = match file_log_dir(&cli.command) {
        Some(log_dir) => {
            let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    commands::handle_command(cli.command)
}

const LOG_FILE_NAME: &str = "runline.log";

/// Directory for the daily JSON log, or `None` when the command must not
/// write anything (`resolve`) or the directory cannot be created.
fn file_log_dir(command: &Commands) -> Option<PathBuf> {
    if matches!(command, Commands::Resolve { .. }) {
        return None;
    }
    let log_dir = directories::ProjectDirs::from("dev", "runline", "runline")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    match std::fs::create_dir_all(&log_dir) {
        Ok(()) => Some(log_dir),
        Err(e) => {
            eprintln!(
                "warning: file logging disabled, cannot create {}: {}",
                log_dir.display(),
                e
            );
            None
        }
    }
}
