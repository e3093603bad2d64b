pub mod config;
pub mod simulate;
pub mod stats;

use std::path::Path;

use anyhow::{Context, Result};
use persuade_core::PersuadeConfig;

/// Load the config at `path`, or the default location when unset.
///
/// An explicit path must exist; the default location may be absent.
pub fn load_config(path: Option<&Path>) -> Result<PersuadeConfig> {
    match path {
        Some(path) => PersuadeConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => {
            let default = PersuadeConfig::default_path();
            PersuadeConfig::load_or_default(&default)
                .with_context(|| format!("loading config from {}", default.display()))
        }
    }
}
