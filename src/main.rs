// src/main.rs

//! gptbuilder
//!
//! Entry point for the gptbuilder CLI.
//!
//! Responsibilities of this file:
//! - Parse CLI arguments
//! - Load configuration and install logging
//! - Hand off to the runner
//!
//! There is no pipeline logic here.

use anyhow::Result;
use clap::Parser;

use gptbuilder::{cli, config::Config, logging, runner};

/// Tokio because execution and health checks wait on child processes
/// asynchronously.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    let cfg = Config::load(cli.config.as_deref())?;

    // Dropping the guard flushes the log file.
    let _guard = logging::init(&cfg.log_level, cfg.log_file.as_deref(), cli.verbose);

    runner::run(cli, cfg).await
}
