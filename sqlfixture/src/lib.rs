//! Command-line front end for the test environment bootstrap.
//!
//! The binary logic lives here so it can be exercised without spawning a
//! process; `main.rs` only parses arguments, installs logging, and maps the
//! result to an exit code.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sqlfixture_core::{
    BootstrapConfig, Environment, ProbeRecord, ProbeStatus, Readiness,
};
use std::path::PathBuf;
use tracing::info;

/// CLI argument structure
#[derive(Debug, Parser)]
#[command(name = "sqlfixture")]
#[command(about = "Reproducible SQL Server test environment bootstrap")]
#[command(version)]
#[command(long_about = "
sqlfixture - bring a SQL Server test database to a known fixture state

Discovers a working driver, password, and database combination, waits for
a booting server, runs the external initializer, and seeds the minimal
fixture tables the data-pipeline tests rely on.

CONFIGURATION (environment):
  SQL_SERVER_HOST, SQL_SERVER_PORT, SQL_SERVER_USER
  SQL_SERVER_PASSWORD, SQL_SERVER_DATABASE    highest-priority guesses
  SQL_CONNECTION_STRING                       bypasses discovery
  SQL_ODBC_DRIVERS                            comma-separated candidates
  SQL_READY_MAX_ATTEMPTS, SQL_READY_DELAY_SECS, SQL_PROBE_TIMEOUT_SECS
  SQL_INIT_SCRIPT, SQL_INIT_TIMEOUT_SECS, SQL_FIXTURES_FILE

EXAMPLES:
  sqlfixture ensure
  sqlfixture -v probe
  sqlfixture --fixtures-file fixtures.json validate
  sqlfixture --prompt-password seed
")]
pub struct Cli {
    /// Flags shared by every command
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the full bootstrap once
    Ensure,
    /// Run one pass over the candidate matrix and report each probe
    Probe,
    /// Print the fixture validation result as JSON
    Validate,
    /// Create whatever part of the fixture contract is missing
    Seed,
}

/// Global flags
#[derive(Debug, Default, Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all output except errors")]
    pub quiet: bool,

    /// Fixture definitions file
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "SQL_FIXTURES_FILE",
        help = "JSON fixture definitions replacing the built-in tables"
    )]
    pub fixtures_file: Option<PathBuf>,

    /// External initializer script
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "SQL_INIT_SCRIPT",
        conflicts_with = "no_init_script",
        help = "Initializer script run after discovery"
    )]
    pub init_script: Option<PathBuf>,

    /// Skip the external initializer
    #[arg(long, global = true, help = "Never run an initializer; seed fixtures directly")]
    pub no_init_script: bool,

    /// Seed fixtures when the initializer fails
    #[arg(
        long,
        global = true,
        help = "Fall back to the fixture seeder if the initializer fails"
    )]
    pub seed_after_initializer_failure: bool,

    /// Prompt for a password to try first
    #[arg(
        long,
        global = true,
        help = "Prompt for a password and try it before the configured candidates"
    )]
    pub prompt_password: bool,
}

/// What a command printed and whether it succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Text for standard output
    pub message: String,
    /// Whether the process should exit with success
    pub success: bool,
}

impl CommandOutput {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: true,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: false,
        }
    }
}

/// Builds the bootstrap configuration from the environment and the flags.
///
/// # Security
/// A prompted password is read without echo and never logged.
///
/// # Errors
/// Returns an error if the environment holds invalid values or the
/// password prompt fails.
pub fn build_config(global: &GlobalArgs) -> anyhow::Result<BootstrapConfig> {
    let mut config = apply_overrides(BootstrapConfig::from_env()?, global);

    if global.prompt_password {
        let password = rpassword::prompt_password("SQL Server password: ")
            .context("Failed to read password")?;
        if password.is_empty() {
            anyhow::bail!("Password cannot be empty");
        }
        config = config.with_preferred_password(password);
    }

    Ok(config)
}

fn apply_overrides(mut config: BootstrapConfig, global: &GlobalArgs) -> BootstrapConfig {
    if let Some(path) = &global.fixtures_file {
        config = config.with_fixtures_file(path);
    }
    if global.no_init_script {
        config = config.with_init_script(None);
    } else if let Some(path) = &global.init_script {
        config = config.with_init_script(Some(path.clone()));
    }
    if global.seed_after_initializer_failure {
        config = config.with_seed_after_initializer_failure(true);
    }
    config
}

/// Execute the CLI command against an environment
///
/// # Errors
/// Returns an error if a command cannot produce a report at all, e.g. when
/// seeding fails or JSON serialization fails.
pub fn execute_cli(cli: &Cli, environment: &Environment) -> anyhow::Result<CommandOutput> {
    match cli.command {
        Command::Ensure => Ok(ensure(environment)),
        Command::Probe => Ok(probe(environment)),
        Command::Validate => {
            let result = environment.validate();
            let json = serde_json::to_string_pretty(&result)
                .context("Failed to serialize validation result")?;
            Ok(CommandOutput {
                message: json,
                success: result.data_available,
            })
        }
        Command::Seed => {
            let report = environment.seed()?;
            info!(
                "Seeding {}",
                if report.skipped { "skipped" } else { "finished" }
            );
            let json =
                serde_json::to_string_pretty(&report).context("Failed to serialize seed report")?;
            Ok(CommandOutput::ok(json))
        }
    }
}

fn ensure(environment: &Environment) -> CommandOutput {
    match environment.ensure_ready() {
        Readiness::Ready(target) => CommandOutput::ok(format!("Test environment ready: {target}")),
        outcome @ Readiness::Skipped { .. } => {
            CommandOutput::ok(outcome.skip_message().unwrap_or_default())
        }
        Readiness::Failed(failure) => {
            let mut message = format!("Bootstrap failed: {failure}");
            if let Some(diagnostics) = &failure.diagnostics {
                message.push('\n');
                message.push_str(diagnostics);
            }
            CommandOutput::failed(message)
        }
    }
}

fn probe(environment: &Environment) -> CommandOutput {
    if !environment.is_driver_available() {
        return CommandOutput::failed("SQL Server driver library is not available in this build");
    }

    let pass = environment.probe_pass();
    let mut lines: Vec<String> = pass.records.iter().map(describe_probe).collect();
    match &pass.winner {
        Some((candidate, _)) => lines.push(format!("Resolved: {}", candidate.label())),
        None => lines.push("No candidate connected".to_string()),
    }
    let message = lines.join("\n");

    if pass.winner.is_some() {
        CommandOutput::ok(message)
    } else {
        CommandOutput::failed(message)
    }
}

fn describe_probe(record: &ProbeRecord) -> String {
    match &record.status {
        ProbeStatus::Connected => format!("[OK]      {}", record.label),
        ProbeStatus::DriverNotFound => format!("[MISSING] {}", record.label),
        ProbeStatus::Rejected(reason) => format!("[REJECT]  {}: {reason}", record.label),
    }
}
