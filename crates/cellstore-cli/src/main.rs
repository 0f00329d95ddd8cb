//! cellstore CLI - Command-line interface
//!
//! Runs feature store operations against a local data directory.

mod cli;
mod commands;
mod config_loader;
mod output;
mod output_types;
mod storage;

use clap::Parser;
use cli::Cli;
use output::OutputWriter;

fn main() {
    // Logs go to stderr so `--json` output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output = OutputWriter::new(cli.json);

    let result = tokio::runtime::Runtime::new()
        .map_err(anyhow::Error::from)
        .and_then(|runtime| runtime.block_on(commands::execute(cli, &output)));

    if let Err(err) = result {
        output.error(format!("{:#}", err));
        if let Some(op) = err.downcast_ref::<cellstore_core::OperationError>() {
            if op.retryable {
                output.info("The operation can be retried");
            }
        }
        std::process::exit(1);
    }
}
