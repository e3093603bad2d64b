use std::path::Path;

use anyhow::Result;
use clap::{Args, Subcommand};
use persuade_core::PersuadeConfig;

use super::load_config;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Show the configuration file path
    Path,
}

pub fn run(args: ConfigArgs, config_path: Option<&Path>) -> Result<()> {
    match args.command {
        ConfigCommands::Show => show_config(config_path),
        ConfigCommands::Path => show_path(config_path),
    }
}

fn show_config(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    println!("{}", config.to_toml_string()?);
    Ok(())
}

fn show_path(config_path: Option<&Path>) -> Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(PersuadeConfig::default_path);
    let status = if path.exists() { "" } else { " (not found, using defaults)" };
    println!("Config: {}{status}", path.display());
    Ok(())
}
