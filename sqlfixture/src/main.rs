//! SQL Server test environment bootstrap tool.
//!
//! Runs the same once-per-process bootstrap the test suites use, so a CI
//! job can prepare the database up front or an engineer can see why
//! discovery fails.
//!
//! # Security Guarantees
//! - Passwords are never printed or logged
//! - Connection strings are redacted in all output

use clap::Parser;
use sqlfixture::{Cli, build_config, execute_cli};
use sqlfixture_core::{Environment, logging::init_logging};
use std::process::ExitCode;
use tracing::error;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.global.verbose, cli.global.quiet) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    match run(&cli) {
        Ok(output) => {
            if !cli.global.quiet || !output.success {
                println!("{}", output.message);
            }
            if output.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<sqlfixture::CommandOutput> {
    let config = build_config(&cli.global)?;
    let environment = Environment::from_config(config)?;
    execute_cli(cli, &environment)
}
