//! Tarema CLI
//!
//! Replays recorded task terminations offline and inspects a running
//! scheduler service.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{labels, replay};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Tarema placement scheduler CLI
#[derive(Parser)]
#[command(name = "tarema")]
#[command(author, version, about = "CLI for the Tarema placement scheduler", long_about = None)]
pub struct Cli {
    /// Scheduler service URL (can also be set via TAREMA_API_URL env var)
    #[arg(long, env = "TAREMA_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay recorded terminations and write labelling CSV files
    Replay {
        /// JSON Lines file with one task termination per line
        #[arg(long, short)]
        input: PathBuf,

        /// Directory for the CSV files
        #[arg(long, short, default_value = ".")]
        out_dir: PathBuf,

        /// Nodes the estimator must see before labelling
        #[arg(long)]
        expected_nodes: Option<usize>,

        /// Benchmark file; labels nodes from it instead of the estimator
        #[arg(long)]
        benchmarks: Option<PathBuf>,

        /// JSON engine configuration
        #[arg(long)]
        engine_config: Option<PathBuf>,
    },

    /// Show current node and task labels of a running scheduler
    Labels,

    /// Show node speed estimations of a running scheduler
    Estimations,

    /// Show engine status and component health
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    let config = config::Config::load()?;
    let api_url = cli.api_url.or(config.api_url);
    let connect = || {
        client::ApiClient::new(api_url.as_deref().unwrap_or(DEFAULT_API_URL))
    };

    match cli.command {
        Commands::Replay {
            input,
            out_dir,
            expected_nodes,
            benchmarks,
            engine_config,
        } => {
            let args = replay::ReplayArgs {
                input,
                out_dir,
                expected_nodes: expected_nodes.or(config.expected_nodes),
                benchmarks,
                engine_config,
            };
            replay::run(args, cli.format)?;
        }
        Commands::Labels => labels::show_labels(&connect()?, cli.format).await?,
        Commands::Estimations => labels::show_estimations(&connect()?, cli.format).await?,
        Commands::Status => labels::show_status(&connect()?, cli.format).await?,
    }

    Ok(())
}
