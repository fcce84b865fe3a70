//! Bootstrap configuration.
//!
//! Everything is optional and environment-overridable. Explicit password
//! and database settings become the highest-priority matrix candidates
//! rather than replacing the built-in guesses, so one configuration works
//! across local machines, CI containers, and CI runs seeded with a
//! different password.
//!
//! # Security
//! Password candidates are held in `Zeroizing` containers and `Debug`
//! prints only how many there are.

use crate::error::{BootstrapError, Result, redact_connection_string};
use std::path::PathBuf;
use std::time::Duration;
use zeroize::Zeroizing;

/// Target host
pub const ENV_HOST: &str = "SQL_SERVER_HOST";
/// Target port
pub const ENV_PORT: &str = "SQL_SERVER_PORT";
/// Login name
pub const ENV_USER: &str = "SQL_SERVER_USER";
/// Highest-priority password candidate
pub const ENV_PASSWORD: &str = "SQL_SERVER_PASSWORD";
/// Highest-priority database-name candidate
pub const ENV_DATABASE: &str = "SQL_SERVER_DATABASE";
/// Verbatim connection string; bypasses the matrix
pub const ENV_CONNECTION_STRING: &str = "SQL_CONNECTION_STRING";
/// Comma-separated driver candidates replacing the defaults
pub const ENV_ODBC_DRIVERS: &str = "SQL_ODBC_DRIVERS";
/// Driver of the resolved profile, exported to the initializer
pub const ENV_ODBC_DRIVER: &str = "SQL_ODBC_DRIVER";
/// External initializer script path
pub const ENV_INIT_SCRIPT: &str = "SQL_INIT_SCRIPT";
/// External initializer timeout in seconds
pub const ENV_INIT_TIMEOUT_SECS: &str = "SQL_INIT_TIMEOUT_SECS";
/// Readiness attempts
pub const ENV_READY_MAX_ATTEMPTS: &str = "SQL_READY_MAX_ATTEMPTS";
/// Delay between readiness attempts in seconds
pub const ENV_READY_DELAY_SECS: &str = "SQL_READY_DELAY_SECS";
/// Per-probe connect timeout in seconds
pub const ENV_PROBE_TIMEOUT_SECS: &str = "SQL_PROBE_TIMEOUT_SECS";
/// JSON fixture definitions file
pub const ENV_FIXTURES_FILE: &str = "SQL_FIXTURES_FILE";

/// Driver candidates in priority order.
pub const DEFAULT_DRIVERS: &[&str] = &[
    "ODBC Driver 18 for SQL Server",
    "ODBC Driver 17 for SQL Server",
];

/// Passwords commonly used by local and CI SQL Server containers.
pub const DEFAULT_PASSWORDS: &[&str] = &["YourStrong@Passw0rd", "YourStrong!Passw0rd", "Passw0rd!"];

/// Database names tried after any configured one.
pub const DEFAULT_DATABASES: &[&str] = &["pipeline_test", "master"];

/// Initializer script looked up when none is configured.
pub const DEFAULT_INIT_SCRIPT: &str = "scripts/init_test_db.sh";

/// Configuration for the test environment bootstrap.
///
/// # Example
/// ```rust
/// use sqlfixture_core::BootstrapConfig;
/// use std::time::Duration;
///
/// let config = BootstrapConfig::new("localhost")
///     .with_port(14330)
///     .with_passwords(["p1", "p2"])
///     .with_databases(["db1"])
///     .with_wait(5, Duration::from_secs(4));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct BootstrapConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Login name
    pub user: String,
    /// Driver candidates, highest priority first
    pub drivers: Vec<String>,
    /// Database-name candidates, highest priority first
    pub databases: Vec<String>,
    passwords: Vec<Zeroizing<String>>,
    connection_string: Option<Zeroizing<String>>,
    /// Connect timeout for a single probe
    pub probe_timeout: Duration,
    /// Full matrix passes before giving up
    pub ready_max_attempts: u32,
    /// Sleep between matrix passes
    pub ready_delay: Duration,
    /// External initializer script
    pub init_script: Option<PathBuf>,
    /// Wall-clock limit for the initializer
    pub init_timeout: Duration,
    /// Fixture definitions file; built-in fixtures when unset
    pub fixtures_file: Option<PathBuf>,
    /// Try the lightweight seeder when the initializer fails
    pub seed_after_initializer_failure: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1433,
            user: "sa".to_string(),
            drivers: DEFAULT_DRIVERS.iter().map(ToString::to_string).collect(),
            databases: DEFAULT_DATABASES.iter().map(ToString::to_string).collect(),
            passwords: DEFAULT_PASSWORDS
                .iter()
                .map(|p| Zeroizing::new((*p).to_string()))
                .collect(),
            connection_string: None,
            probe_timeout: Duration::from_secs(5),
            ready_max_attempts: 30,
            ready_delay: Duration::from_secs(2),
            init_script: Some(PathBuf::from(DEFAULT_INIT_SCRIPT)),
            init_timeout: Duration::from_secs(300),
            fixtures_file: None,
            seed_after_initializer_failure: false,
        }
    }
}

impl std::fmt::Debug for BootstrapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("drivers", &self.drivers)
            .field("databases", &self.databases)
            .field("passwords", &format_args!("<{} candidates>", self.passwords.len()))
            .field(
                "connection_string",
                &self
                    .connection_string
                    .as_ref()
                    .map(|s| redact_connection_string(s)),
            )
            .field("probe_timeout", &self.probe_timeout)
            .field("ready_max_attempts", &self.ready_max_attempts)
            .field("ready_delay", &self.ready_delay)
            .field("init_script", &self.init_script)
            .field("init_timeout", &self.init_timeout)
            .field("fixtures_file", &self.fixtures_file)
            .field(
                "seed_after_initializer_failure",
                &self.seed_after_initializer_failure,
            )
            .finish()
    }
}

impl BootstrapConfig {
    /// Creates a config for `host` with defaults everywhere else.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Reads configuration from the process environment.
    ///
    /// # Errors
    /// Returns an error if a numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through an arbitrary key lookup.
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    /// Returns an error if a numeric value does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();

        if let Some(host) = get(ENV_HOST) {
            config.host = host;
        }
        if let Some(port) = get(ENV_PORT) {
            config.port = parse_number(ENV_PORT, &port)?;
        }
        if let Some(user) = get(ENV_USER) {
            config.user = user;
        }
        if let Some(drivers) = get(ENV_ODBC_DRIVERS) {
            config.drivers = drivers
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Some(password) = lookup(ENV_PASSWORD).filter(|p| !p.is_empty()) {
            // Passwords are taken untrimmed; whitespace may be significant.
            config = config.with_preferred_password(password);
        }
        if let Some(database) = get(ENV_DATABASE) {
            config = config.with_preferred_database(database);
        }
        if let Some(connection_string) = get(ENV_CONNECTION_STRING) {
            config = config.with_connection_string(connection_string);
        }
        if let Some(path) = get(ENV_INIT_SCRIPT) {
            config.init_script = Some(PathBuf::from(path));
        }
        if let Some(secs) = get(ENV_INIT_TIMEOUT_SECS) {
            config.init_timeout = Duration::from_secs(parse_number(ENV_INIT_TIMEOUT_SECS, &secs)?);
        }
        if let Some(attempts) = get(ENV_READY_MAX_ATTEMPTS) {
            config.ready_max_attempts = parse_number(ENV_READY_MAX_ATTEMPTS, &attempts)?;
        }
        if let Some(secs) = get(ENV_READY_DELAY_SECS) {
            config.ready_delay = Duration::from_secs(parse_number(ENV_READY_DELAY_SECS, &secs)?);
        }
        if let Some(secs) = get(ENV_PROBE_TIMEOUT_SECS) {
            config.probe_timeout =
                Duration::from_secs(parse_number(ENV_PROBE_TIMEOUT_SECS, &secs)?);
        }
        if let Some(path) = get(ENV_FIXTURES_FILE) {
            config.fixtures_file = Some(PathBuf::from(path));
        }

        Ok(config)
    }

    /// Validates configuration values.
    ///
    /// # Errors
    /// Returns error if a value would make discovery impossible.
    pub fn validate(&self) -> Result<()> {
        if self.ready_max_attempts == 0 {
            return Err(BootstrapError::configuration(
                "ready_max_attempts must be greater than 0",
            ));
        }

        if self.probe_timeout.is_zero() {
            return Err(BootstrapError::configuration(
                "probe_timeout must be greater than 0",
            ));
        }

        if self.init_timeout.is_zero() {
            return Err(BootstrapError::configuration(
                "init_timeout must be greater than 0",
            ));
        }

        // A verbatim connection string makes the matrix dimensions irrelevant.
        if self.connection_string.is_some() {
            return Ok(());
        }

        if self.host.is_empty() {
            return Err(BootstrapError::configuration("host cannot be empty"));
        }

        if self.port == 0 {
            return Err(BootstrapError::configuration(
                "port must be greater than 0",
            ));
        }

        if self.drivers.is_empty() {
            return Err(BootstrapError::configuration(
                "at least one driver candidate is required",
            ));
        }

        if self.databases.is_empty() {
            return Err(BootstrapError::configuration(
                "at least one database candidate is required",
            ));
        }

        if self.passwords.is_empty() {
            return Err(BootstrapError::configuration(
                "at least one password candidate is required",
            ));
        }

        Ok(())
    }

    /// Password candidates in priority order. Never log the values.
    pub fn passwords(&self) -> impl Iterator<Item = &str> {
        self.passwords.iter().map(|p| p.as_str())
    }

    /// Configured verbatim connection string, if any.
    pub fn connection_string(&self) -> Option<&str> {
        self.connection_string.as_deref().map(String::as_str)
    }

    /// Builder method to set port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder method to set the login name.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Builder method replacing the driver candidates.
    #[must_use]
    pub fn with_drivers<I, S>(mut self, drivers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.drivers = drivers.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method replacing the database candidates.
    #[must_use]
    pub fn with_databases<I, S>(mut self, databases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.databases = dedup(databases.into_iter().map(Into::into));
        self
    }

    /// Builder method replacing the password candidates.
    #[must_use]
    pub fn with_passwords<I, S>(mut self, passwords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.passwords = dedup(passwords.into_iter().map(Into::into))
            .into_iter()
            .map(Zeroizing::new)
            .collect();
        self
    }

    /// Puts `password` first in the candidate list.
    #[must_use]
    pub fn with_preferred_password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        let rest = self
            .passwords
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>();
        self.passwords = dedup(std::iter::once(password).chain(rest))
            .into_iter()
            .map(Zeroizing::new)
            .collect();
        self
    }

    /// Puts `database` first in the candidate list.
    #[must_use]
    pub fn with_preferred_database(mut self, database: impl Into<String>) -> Self {
        let rest = std::mem::take(&mut self.databases);
        self.databases = dedup(std::iter::once(database.into()).chain(rest));
        self
    }

    /// Builder method to bypass the matrix with a verbatim connection string.
    #[must_use]
    pub fn with_connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = Some(Zeroizing::new(connection_string.into()));
        self
    }

    /// Builder method to set the retry budget.
    #[must_use]
    pub const fn with_wait(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.ready_max_attempts = max_attempts;
        self.ready_delay = delay;
        self
    }

    /// Builder method to set the per-probe connect timeout.
    #[must_use]
    pub const fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Builder method to set (or clear) the initializer script.
    #[must_use]
    pub fn with_init_script(mut self, path: Option<PathBuf>) -> Self {
        self.init_script = path;
        self
    }

    /// Builder method to set the initializer timeout.
    #[must_use]
    pub const fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Builder method to set the fixtures file.
    #[must_use]
    pub fn with_fixtures_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.fixtures_file = Some(path.into());
        self
    }

    /// Builder method controlling the seeder fallback after initializer failure.
    #[must_use]
    pub const fn with_seed_after_initializer_failure(mut self, enabled: bool) -> Self {
        self.seed_after_initializer_failure = enabled;
        self
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| BootstrapError::configuration(format!("{key} must be a non-negative integer")))
}

fn dedup<I: IntoIterator<Item = String>>(values: I) -> Vec<String> {
    let mut seen = Vec::new();
    for value in values {
        if !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen
}
