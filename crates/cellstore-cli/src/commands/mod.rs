//! Command implementations

mod config;
mod features;
mod put;
mod rows;

use anyhow::Result;
use cellstore_core::config::StoreSettings;
use std::path::Path;

use crate::cli::{Cli, Commands};
use crate::config_loader::load_config;
use crate::output::OutputWriter;
use crate::storage::Storage;

/// Execute a CLI command
pub async fn execute(cli: Cli, output: &OutputWriter) -> Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Commands::Config => config::execute(&config, output),
        command => run(command, &cli.data_dir, config.resolve()?, output).await,
    }
}

async fn run(
    command: Commands,
    data_dir: &Path,
    settings: StoreSettings,
    output: &OutputWriter,
) -> Result<()> {
    let storage = Storage::open(data_dir, settings)?;

    match command {
        Commands::Put(args) => put::execute(args, &storage, output).await,
        Commands::Delete(args) => put::delete(args, &storage, output).await,
        Commands::Get(args) => features::get(args, &storage, output).await,
        Commands::Find(args) => features::find(args, &storage, output).await,
        Commands::Bbox(args) => features::bbox(args, &storage, output).await,
        Commands::Export(args) => features::export(args, &storage, output).await,
        Commands::Info(args) => rows::info(args, &storage, output).await,
        Commands::Dump(args) => rows::dump(args, &storage, output).await,
        Commands::Cells(args) => rows::cells(args, &storage, output).await,
        Commands::Config => Ok(()),
    }
}
