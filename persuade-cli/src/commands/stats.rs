use std::path::Path;

use anyhow::Result;
use clap::Args;
use persuade_core::StrategyEngine;

use super::load_config;
use crate::output::print_statistics;

#[derive(Args)]
pub struct StatsArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: StatsArgs, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = StrategyEngine::open(config).await?;
    let stats = engine.learning_statistics()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_statistics(&stats);
    }
    Ok(())
}
