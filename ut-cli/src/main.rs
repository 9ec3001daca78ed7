//! ut CLI - self-check harness for the ut-testing engine
//!
//! Runs the built-in case table through the engine and exits non-zero if
//! any case's outcome differs from the outcome it is expected to produce.

use anyhow::Result;
use clap::Parser;
use colored::*;
use std::path::PathBuf;
use tracing::{error, info};
use ut_testing::RunnerConfig;

mod commands;

use commands::selfcheck::ReportFormat;
use commands::selfcheck_command;

/// ut - asynchronous unit-testing engine self-check
#[derive(Parser)]
#[command(name = "ut")]
#[command(about = "Run the ut-testing self-check suite")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Do not print each test's log as it completes
    #[arg(short, long)]
    quiet: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Summary format
    #[arg(short, long, value_enum, default_value = "text")]
    format: ReportFormat,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let mut config = RunnerConfig::load(cli.config.as_deref())?;
    if cli.quiet || cli.format == ReportFormat::Json {
        config.emit = false;
    }
    if cli.no_color {
        config.color = false;
        colored::control::set_override(false);
    }

    match selfcheck_command(config, cli.format).await {
        Ok(true) => {
            info!("Self-check completed successfully");
            Ok(())
        }
        Ok(false) => {
            error!("Self-check found mismatching cases");
            std::process::exit(1);
        }
        Err(e) => {
            error!("Self-check failed: {}", e);
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
