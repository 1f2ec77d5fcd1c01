//! `churnprep` command-line entry point.
//!
//! ```bash
//! churnprep inspect --source data/raw/churn.csv
//! churnprep run -s data/raw -c contract.yaml -p plan.yaml -o artifacts
//! churnprep verify --receipt artifacts/x_train.csv.receipt.json
//! ```
//!
//! Logs go to the console and to daily files in the platform log directory
//! (or `log_dir` from the settings). `RUST_LOG` controls the level.

#![warn(clippy::all, rust_2018_idioms)]
#![expect(clippy::print_stdout)] // Allow println! in main binary

mod cli;

use anyhow::Result;
use churnprep::config::Settings;
use clap::Parser as _;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let settings = Settings::load(cli.settings.as_deref())?;

    // File logging is best effort: fall back to a plain stderr logger.
    if let Err(e) = churnprep::logging::init(settings.log_dir.as_deref()) {
        env_logger::init();
        log::warn!("File logging unavailable, using stderr only: {e}");
    }

    cli::run_command(cli.command, &settings)
}
