use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "persuade", about = "Operate the persuasion strategy engine")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run synthetic conversations through the engine
    Simulate(commands::simulate::SimulateArgs),
    /// Show learning statistics from the persistent ledger
    Stats(commands::stats::StatsArgs),
    /// Inspect configuration
    Config(commands::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Simulate(args) => commands::simulate::run(args, config_path).await,
        Commands::Stats(args) => commands::stats::run(args, config_path).await,
        Commands::Config(args) => commands::config::run(args, config_path),
    }
}
