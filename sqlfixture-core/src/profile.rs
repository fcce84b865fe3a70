//! Connection profiles and targets.
//!
//! A [`ConnectionProfile`] is one guess from the candidate matrix. A
//! [`ConnectionTarget`] is what the driver is asked to connect to: either
//! such a profile or a connection string taken verbatim from configuration.
//!
//! # Security
//! Passwords live in `Zeroizing` containers and are left out of `Debug`
//! and `Display`. Connection strings are printed only after redaction.

use crate::error::redact_connection_string;
use zeroize::Zeroizing;

/// One concrete set of connection parameters.
#[derive(Clone)]
pub struct ConnectionProfile {
    /// Server host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Login name
    pub user: String,
    password: Zeroizing<String>,
    /// Database to open after login
    pub database: String,
    /// Driver name, e.g. `ODBC Driver 18 for SQL Server`
    pub driver: String,
}

impl ConnectionProfile {
    /// Creates a profile.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
        driver: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: Zeroizing::new(password.into()),
            database: database.into(),
            driver: driver.into(),
        }
    }

    /// Password for this profile. Never log the returned value.
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl PartialEq for ConnectionProfile {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.user == other.user
            && self.password() == other.password()
            && self.database == other.database
            && self.driver == other.driver
    }
}

impl Eq for ConnectionProfile {}

impl std::fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"****")
            .field("database", &self.database)
            .field("driver", &self.driver)
            .finish()
    }
}

impl std::fmt::Display for ConnectionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}@{}:{}/{}",
            self.driver, self.user, self.host, self.port, self.database
        )
    }
}

/// What the driver connects to.
#[derive(Clone)]
pub enum ConnectionTarget {
    /// Parameters discovered through the candidate matrix
    Profile(ConnectionProfile),
    /// ADO-style connection string used exactly as configured
    ConnectionString(Zeroizing<String>),
}

impl ConnectionTarget {
    /// Wraps a verbatim connection string.
    pub fn connection_string(value: impl Into<String>) -> Self {
        Self::ConnectionString(Zeroizing::new(value.into()))
    }

    /// Driver name for profile targets.
    pub fn driver(&self) -> Option<&str> {
        match self {
            Self::Profile(profile) => Some(&profile.driver),
            Self::ConnectionString(_) => None,
        }
    }

    /// Profile, if this target came from the matrix.
    pub const fn profile(&self) -> Option<&ConnectionProfile> {
        match self {
            Self::Profile(profile) => Some(profile),
            Self::ConnectionString(_) => None,
        }
    }

    /// Environment variables describing this target to a child process.
    ///
    /// Uses the same names the bootstrap reads, so an initializer script
    /// sees exactly the connection that was resolved.
    pub fn environment(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Profile(profile) => vec![
                (crate::config::ENV_HOST, profile.host.clone()),
                (crate::config::ENV_PORT, profile.port.to_string()),
                (crate::config::ENV_USER, profile.user.clone()),
                (crate::config::ENV_PASSWORD, profile.password().to_string()),
                (crate::config::ENV_DATABASE, profile.database.clone()),
                (crate::config::ENV_ODBC_DRIVER, profile.driver.clone()),
            ],
            Self::ConnectionString(value) => {
                vec![(crate::config::ENV_CONNECTION_STRING, value.to_string())]
            }
        }
    }
}

impl PartialEq for ConnectionTarget {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Profile(a), Self::Profile(b)) => a == b,
            (Self::ConnectionString(a), Self::ConnectionString(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl Eq for ConnectionTarget {}

impl std::fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Profile(profile) => f.debug_tuple("Profile").field(profile).finish(),
            Self::ConnectionString(value) => f
                .debug_tuple("ConnectionString")
                .field(&redact_connection_string(value))
                .finish(),
        }
    }
}

impl std::fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Profile(profile) => std::fmt::Display::fmt(profile, f),
            Self::ConnectionString(value) => {
                write!(f, "connection string ({})", redact_connection_string(value))
            }
        }
    }
}
