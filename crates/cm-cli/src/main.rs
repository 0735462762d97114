//! connmux CLI
//!
//! - `check`: report whether commands may share a multiplexed connection
//! - `stress`: hammer a multiplexed connection and verify reply ordering
//! - `config`: show or initialize the configuration file

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use connmux::commands::{self, StressOptions};

#[derive(Parser)]
#[command(name = "connmux")]
#[command(author, version, about = "Share one ordered connection between many callers")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "CONNMUX_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether commands can be sent over a multiplexed connection
    Check {
        /// Command names to check
        #[arg(required = true)]
        commands: Vec<String>,
    },

    /// Run concurrent handles against an in-process echo server
    Stress {
        /// Number of concurrent handles
        #[arg(long, default_value_t = 8)]
        handles: usize,
        /// Batches sent by each handle
        #[arg(long, default_value_t = 100)]
        rounds: usize,
        /// Largest number of commands pipelined per batch
        #[arg(long, default_value_t = 4)]
        batch: usize,
        /// Largest random reply delay in microseconds
        #[arg(long, default_value_t = 0)]
        jitter_us: u64,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show the default config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Check { commands: names } => {
            let config = commands::load_or_default(config_path)?;
            commands::check_command(&config, &names)?;
        }

        Commands::Stress {
            handles,
            rounds,
            batch,
            jitter_us,
        } => {
            let config = commands::load_or_default(config_path)?;
            let options = StressOptions {
                handles,
                rounds,
                max_batch: batch,
                jitter: Duration::from_micros(jitter_us),
            };
            let report = commands::stress_command(config, options).await?;
            if report.mismatches > 0 {
                bail!("{} replies were delivered out of order", report.mismatches);
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(config_path)?,
            ConfigAction::Init { force } => {
                commands::config_init(config_path, force)?;
            }
            ConfigAction::Path => {
                println!("{}", cm_core::config::default_config_path().display());
            }
        },
    }

    Ok(())
}
