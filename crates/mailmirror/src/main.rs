mod cli;
mod commands;
mod config;
mod logging;
mod output;
mod uid_input;

use anyhow::Result;
use clap::Parser;

use crate::cli::Cli;
use crate::output::output_error;

fn main() -> Result<()> {
    logging::init_logging();
    let cli = Cli::parse();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    if let Err(err) = commands::run_cli(&rt, cli) {
        tracing::error!(error = %format!("{:#}", err), "command failed");
        output_error(&format!("{:#}", err))?;
        std::process::exit(1);
    }
    Ok(())
}
