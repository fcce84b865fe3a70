//! Error types with credential sanitization.
//!
//! Every error in this module is safe to print: passwords and connection
//! strings never appear in messages. Connection strings that must be shown
//! go through [`redact_connection_string`] first.

use crate::driver::DriverError;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

/// Main error type for bootstrap operations.
///
/// Probe-level variants (`DriverNotFoundForCandidate`, `CredentialRejected`)
/// are routine outcomes inside the candidate loop; the remaining variants are
/// bootstrap-level and end up in a [`crate::BootstrapFailure`].
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The native SQL Server driver was not compiled into this build
    #[error("SQL Server driver library is not available in this build")]
    DriverUnavailable,

    /// A specific named driver is not installed
    #[error("Driver '{driver}' is not installed")]
    DriverNotFoundForCandidate { driver: String },

    /// The driver was found but the server rejected the candidate
    #[error("Candidate {candidate} was rejected: {reason}")]
    CredentialRejected { candidate: String, reason: String },

    /// No candidate connected within the retry budget
    #[error("No connection candidate became ready after {attempts} attempt(s)")]
    ReadinessTimeout {
        attempts: u32,
        /// Rejection summaries from the final pass, in matrix order
        last_rejections: Vec<String>,
    },

    /// External initializer exited nonzero, could not start, or was killed
    #[error("External initializer '{}' failed: {reason}", path.display())]
    InitializerProcessFailed {
        path: PathBuf,
        reason: String,
        exit_code: Option<i32>,
        timed_out: bool,
        stdout: String,
        stderr: String,
    },

    /// Fixture table creation or seed insert failed
    #[error("Fixture seeding failed for table '{table}': {context}")]
    SeedingFailed {
        table: String,
        context: String,
        #[source]
        source: DriverError,
    },

    /// Opening a connection to the resolved target failed
    #[error("{context}: {source}")]
    Connection {
        context: String,
        #[source]
        source: DriverError,
    },

    /// A different connection target was already promoted in this process
    #[error("A different connection target is already resolved: {existing}")]
    AlreadyResolved { existing: String },

    /// A connection was requested before the environment became ready
    #[error("Test environment is not ready: {reason}")]
    NotReady { reason: String },

    /// Configuration or validation error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// I/O operation failed
    #[error("I/O operation failed: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization or deserialization failed
    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results with `BootstrapError`
pub type Result<T> = std::result::Result<T, BootstrapError>;

/// Stage of the bootstrap sequence an error or failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapStage {
    /// Driver selection and capability checks
    Driver,
    /// Candidate discovery and readiness waiting
    Readiness,
    /// External initializer subprocess
    Initializer,
    /// Lightweight validation and fixture seeding
    Seeding,
    /// The initialization gate itself
    Gate,
    /// Loading configuration
    Configuration,
}

impl std::fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Driver => "driver",
            Self::Readiness => "readiness",
            Self::Initializer => "initializer",
            Self::Seeding => "seeding",
            Self::Gate => "gate",
            Self::Configuration => "configuration",
        };
        f.write_str(name)
    }
}

impl BootstrapError {
    /// Returns the bootstrap stage this error is attributed to.
    pub const fn stage(&self) -> BootstrapStage {
        match self {
            Self::DriverUnavailable | Self::DriverNotFoundForCandidate { .. } => {
                BootstrapStage::Driver
            }
            Self::CredentialRejected { .. }
            | Self::ReadinessTimeout { .. }
            | Self::Connection { .. }
            | Self::NotReady { .. } => BootstrapStage::Readiness,
            Self::InitializerProcessFailed { .. } | Self::Io { .. } => BootstrapStage::Initializer,
            Self::SeedingFailed { .. } => BootstrapStage::Seeding,
            Self::AlreadyResolved { .. } => BootstrapStage::Gate,
            Self::Configuration { .. } | Self::Serialization { .. } => {
                BootstrapStage::Configuration
            }
        }
    }

    /// Captured diagnostics worth surfacing alongside the message.
    ///
    /// For initializer failures this is the child's stdout and stderr; for
    /// readiness timeouts it is the last pass's rejection list.
    pub fn diagnostics(&self) -> Option<String> {
        match self {
            Self::InitializerProcessFailed { stdout, stderr, .. } => {
                if stdout.is_empty() && stderr.is_empty() {
                    None
                } else {
                    Some(format!("--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}"))
                }
            }
            Self::ReadinessTimeout {
                last_rejections, ..
            } if !last_rejections.is_empty() => Some(last_rejections.join("\n")),
            _ => None,
        }
    }

    /// Creates a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a not-ready error
    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self::NotReady {
            reason: reason.into(),
        }
    }

    /// Creates a seeding error for a table
    pub fn seeding_failed(
        table: impl Into<String>,
        context: impl Into<String>,
        source: DriverError,
    ) -> Self {
        Self::SeedingFailed {
            table: table.into(),
            context: context.into(),
            source,
        }
    }

    /// Creates a connection error with context
    pub fn connection(context: impl Into<String>, source: DriverError) -> Self {
        Self::Connection {
            context: context.into(),
            source,
        }
    }

    /// Creates an I/O error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Masks passwords in an ADO-style connection string.
///
/// Both `Password=` and `PWD=` keys are recognised, case-insensitively, with
/// bare, quoted, or brace-wrapped values.
///
/// # Example
///
/// ```rust
/// use sqlfixture_core::error::redact_connection_string;
///
/// let sanitized = redact_connection_string("Server=tcp:db,1433;User Id=sa;Password=secret;");
/// assert_eq!(sanitized, "Server=tcp:db,1433;User Id=sa;Password=****;");
/// assert!(!sanitized.contains("secret"));
/// ```
pub fn redact_connection_string(connection_string: &str) -> String {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        #[allow(clippy::expect_used)]
        regex::Regex::new(r#"(?i)\b(password|pwd)(\s*=\s*)(\{[^}]*\}|"[^"]*"|'[^']*'|[^;]*)"#)
            .expect("Invalid password pattern")
    });
    pattern
        .replace_all(connection_string, "${1}${2}****")
        .into_owned()
}
