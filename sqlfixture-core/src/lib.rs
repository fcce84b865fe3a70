//! Once-per-process SQL Server test environment bootstrap.
//!
//! Before database-dependent tests run, this crate makes the database
//! reachable and seeded with a known fixture state, exactly once per
//! process no matter how many test fixtures ask for it concurrently.
//!
//! # Flow
//! 1. Probe a candidate matrix of drivers, databases, and passwords until a
//!    combination connects, waiting for a booting server if needed
//! 2. Run the external initializer script (hard timeout), or fall back to
//!    the idempotent fixture seeder
//! 3. Promote the winning target so every later connection reuses it
//!
//! Builds without the `mssql` feature report [`Readiness::Skipped`] so
//! non-database tests keep running.
//!
//! # Security Guarantees
//! - Passwords are held in zeroizing containers
//! - No credentials in logs, errors, or `Debug` output
//! - Initializer children are killed on timeout
//!
//! # Example
//! ```rust,no_run
//! use sqlfixture_core::{ensure_environment_ready, get_connection};
//!
//! let readiness = ensure_environment_ready();
//! if let Some(message) = readiness.skip_message() {
//!     eprintln!("{message}");
//!     return;
//! }
//! let mut conn = get_connection().expect("environment is ready");
//! conn.ping().expect("server answers");
//! ```

pub mod config;
pub mod driver;
pub mod environment;
pub mod error;
pub mod fixtures;
pub mod gate;
pub mod initializer;
pub mod logging;
pub mod matrix;
pub mod probe;
pub mod profile;
pub mod readiness;

// Re-export commonly used types
pub use config::BootstrapConfig;
pub use driver::{
    Connection, Driver, DriverError, DriverResult, UnavailableDriver, is_driver_library_available,
    select_driver,
};
pub use environment::{Environment, ensure_environment_ready, get_connection};
pub use error::{BootstrapError, BootstrapStage, Result};
pub use fixtures::{
    FixtureTableSpec, SeedReport, SeedRow, SqlValue, TableName, ValidationResult,
    default_fixtures,
};
pub use gate::{BootstrapFailure, InitGate, Readiness, ResolvedStore};
pub use initializer::{
    ExternalInitializer, InitializerOutput, InitializerStatus, run_external_initializer,
};
pub use matrix::{Candidate, CandidateMatrix};
pub use probe::{MatrixPass, ProbeOutcome, ProbeRecord, ProbeStatus, probe, probe_matrix};
pub use profile::{ConnectionProfile, ConnectionTarget};
pub use readiness::{ResolvedCandidate, Sleeper, WaitPolicy, thread_sleeper, wait_until_ready};
