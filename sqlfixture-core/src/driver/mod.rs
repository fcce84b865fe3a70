//! Driver capability shim.
//!
//! Whether the native SQL Server driver exists is decided once, at build
//! time, through the `mssql` feature. [`select_driver`] turns that decision
//! into one of two implementations of the small [`Driver`] interface so
//! nothing downstream has to care:
//!
//! - [`tds::TdsDriver`]: the real TDS client (tiberius)
//! - [`unavailable::UnavailableDriver`]: answers every connect with
//!   [`DriverError::Unavailable`]
//!
//! # Security
//! Driver errors never carry passwords or connection strings.

use crate::fixtures::{FixtureTableSpec, SeedRow, TableName, sql};
use crate::profile::ConnectionTarget;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "mssql")]
pub mod tds;
pub mod unavailable;

pub use unavailable::UnavailableDriver;

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

/// SQL Server error number for a rejected login.
pub const LOGIN_FAILED: u32 = 18456;

/// SQL Server error number for a database that cannot be opened.
pub const DATABASE_UNAVAILABLE: u32 = 4060;

/// Structured driver failure with sanitized messages.
///
/// The prober branches on these variants; nothing matches on message text.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The native driver library is not part of this build
    #[error("SQL Server driver library is not available")]
    Unavailable,

    /// The named driver is not installed
    #[error("Driver '{0}' is not installed")]
    DriverNotFound(String),

    /// Server rejected the login
    #[error("Login failed (server error {code})")]
    LoginFailed { code: u32 },

    /// Login succeeded but the requested database cannot be opened
    #[error("Database cannot be opened (server error {code})")]
    DatabaseUnavailable { code: u32 },

    /// TCP connection could not be established
    #[error("Server unreachable: {0}")]
    Unreachable(String),

    /// Connect did not finish in time
    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),

    /// Connection parameters could not be turned into a client config
    #[error("Invalid connection parameters: {0}")]
    InvalidParameters(String),

    /// Server-side error while running a statement
    #[error("Server error {code}: {message}")]
    Server { code: u32, message: String },

    /// Anything else the driver reports
    #[error("Driver error: {0}")]
    Other(String),
}

/// Minimal capability interface over a native database driver.
pub trait Driver: Send + Sync {
    /// Short identifier for logs
    fn name(&self) -> &'static str;

    /// Whether the driver library is usable at all.
    fn is_available(&self) -> bool;

    /// Opens a connection to `target`, giving up after `timeout`.
    ///
    /// # Errors
    /// Returns [`DriverError::Unavailable`] when the library is absent,
    /// [`DriverError::DriverNotFound`] when the target names an unknown
    /// driver, and a login/network classification otherwise.
    fn connect(
        &self,
        target: &ConnectionTarget,
        timeout: Duration,
    ) -> DriverResult<Box<dyn Connection>>;
}

/// An open database connection.
///
/// Implementations provide the two query primitives; the fixture helpers
/// are default methods built on top of them so alternative connections
/// (tests, other engines) can override them wholesale.
pub trait Connection: Send {
    /// Executes a statement batch, returning the total rows affected.
    ///
    /// # Errors
    /// Returns an error if the server rejects the batch.
    fn execute(&mut self, sql: &str) -> DriverResult<u64>;

    /// Runs a query and returns the first column of the first row as `i64`.
    ///
    /// # Errors
    /// Returns an error if the query fails or the column is not an integer.
    fn query_scalar(&mut self, sql: &str) -> DriverResult<Option<i64>>;

    /// Round-trips a trivial query.
    ///
    /// # Errors
    /// Returns an error if the connection is no longer usable.
    fn ping(&mut self) -> DriverResult<()> {
        self.query_scalar("SELECT CAST(1 AS BIGINT)").map(|_| ())
    }

    /// Checks `INFORMATION_SCHEMA` for a base table.
    ///
    /// # Errors
    /// Returns an error if the catalog query fails.
    fn table_exists(&mut self, table: &TableName) -> DriverResult<bool> {
        let count = self.query_scalar(&sql::table_exists(table))?;
        Ok(count.unwrap_or(0) > 0)
    }

    /// Counts rows in a table.
    ///
    /// # Errors
    /// Returns an error if the table cannot be read.
    fn row_count(&mut self, table: &TableName) -> DriverResult<u64> {
        let count = self.query_scalar(&sql::row_count(table))?;
        Ok(count.map_or(0, |c| u64::try_from(c).unwrap_or(0)))
    }

    /// Runs the fixture's DDL behind an `OBJECT_ID` guard.
    ///
    /// # Errors
    /// Returns an error if the DDL fails.
    fn create_table_if_absent(&mut self, spec: &FixtureTableSpec) -> DriverResult<()> {
        self.execute(&sql::guarded_create(spec)).map(|_| ())
    }

    /// Inserts `row` unless a row with the same key already exists.
    ///
    /// Returns `true` when a row was inserted.
    ///
    /// # Errors
    /// Returns an error if the row has no key value or the insert fails.
    fn insert_if_absent(&mut self, spec: &FixtureTableSpec, row: &SeedRow) -> DriverResult<bool> {
        let statement = sql::guarded_insert(spec, row)?;
        Ok(self.execute(&statement)? > 0)
    }
}

/// Whether the native driver library was compiled into this build.
pub const fn is_driver_library_available() -> bool {
    cfg!(feature = "mssql")
}

/// Picks the driver implementation for this process.
///
/// Called once at startup; the result is shared behind an `Arc`.
pub fn select_driver() -> Arc<dyn Driver> {
    #[cfg(feature = "mssql")]
    {
        Arc::new(tds::TdsDriver::new())
    }
    #[cfg(not(feature = "mssql"))]
    {
        tracing::warn!("SQL Server driver not compiled in; database-dependent tests will be skipped");
        Arc::new(UnavailableDriver)
    }
}
