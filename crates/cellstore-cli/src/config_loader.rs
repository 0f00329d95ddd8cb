//! Configuration loading for CLI commands

use anyhow::{Context, Result};
use cellstore_core::config::{CliConfigOverrides, LayeredConfig};

use crate::cli::Cli;

/// Defaults, then the config file, then environment, then CLI flags
pub fn load_config(cli: &Cli) -> Result<LayeredConfig> {
    let default_path = cli.data_dir.join("config.toml");
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None if default_path.is_file() => Some(default_path),
        None => None,
    };

    let mut config = LayeredConfig::with_defaults();
    if let Some(path) = path {
        config = config
            .load_from_file(&path)
            .with_context(|| format!("Failed to load configuration file {}", path.display()))?;
    }
    let mut config = config.load_from_env();

    config.update_from_cli(CliConfigOverrides {
        inline_threshold_bytes: cli.inline_threshold,
        read_concurrency: cli.read_concurrency,
        write_concurrency: cli.write_concurrency,
        blob_prefix: None,
    });
    Ok(config)
}
