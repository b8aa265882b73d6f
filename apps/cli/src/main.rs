//! nbbuild CLI — selective notebook execution and HTML conversion for CI.
//!
//! Picks the notebooks a pull request touched (or all of them), executes them
//! in place, renders them to HTML, and exits non-zero if any notebook failed.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
