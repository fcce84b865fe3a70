//! Logging setup for the bootstrap binary and test harnesses.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! caller's choice.

use crate::error::{BootstrapError, Result};
use tracing_subscriber::EnvFilter;

/// Maps CLI verbosity flags to a level.
///
/// `quiet` wins; otherwise 0 is INFO, 1 is DEBUG, 2 and up is TRACE.
pub const fn verbosity_level(verbose: u8, quiet: bool) -> tracing::Level {
    match (quiet, verbose) {
        (true, _) => tracing::Level::ERROR,
        (false, 0) => tracing::Level::INFO,
        (false, 1) => tracing::Level::DEBUG,
        (false, _) => tracing::Level::TRACE,
    }
}

/// Initializes structured logging based on verbosity level.
///
/// `RUST_LOG`, when set, overrides the level derived from the flags.
///
/// # Errors
/// Returns a configuration error if a global subscriber is already set.
///
/// # Example
/// ```rust,no_run
/// use sqlfixture_core::logging::init_logging;
///
/// // Initialize at DEBUG level
/// init_logging(1, false).expect("Failed to initialize logging");
/// ```
pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    let level = verbosity_level(verbose, quiet);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| BootstrapError::configuration(format!("Failed to initialize logging: {e}")))?;

    Ok(())
}
