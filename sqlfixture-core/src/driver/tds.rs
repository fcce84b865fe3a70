//! Native SQL Server driver over TDS (tiberius).
//!
//! The public API is blocking, so each connection owns a current-thread
//! tokio runtime and drives the async client with `block_on`.
//!
//! Driver names are the familiar ODBC names; each maps to the TLS
//! behaviour that ODBC driver would have by default:
//!
//! | Driver name                     | Encryption                  |
//! |---------------------------------|-----------------------------|
//! | `ODBC Driver 18 for SQL Server` | required, server cert trusted |
//! | `ODBC Driver 17 for SQL Server` | login packet only           |
//! | `SQL Server`                    | none                        |
//!
//! Any other name is reported as [`DriverError::DriverNotFound`].

use super::{Connection, DATABASE_UNAVAILABLE, Driver, DriverError, DriverResult, LOGIN_FAILED};
use crate::profile::{ConnectionProfile, ConnectionTarget};
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

const APPLICATION_NAME: &str = "sqlfixture";

/// TLS behaviour implied by a driver name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// Full encryption, trusting the server certificate
    Required,
    /// Encrypt the login packet only
    LoginOnly,
    /// No encryption at all
    Disabled,
}

impl TlsMode {
    /// Looks up the TLS mode for a known driver name.
    pub fn for_driver(driver: &str) -> Option<Self> {
        match driver.trim() {
            "ODBC Driver 18 for SQL Server" => Some(Self::Required),
            "ODBC Driver 17 for SQL Server" => Some(Self::LoginOnly),
            "SQL Server" => Some(Self::Disabled),
            _ => None,
        }
    }

    fn apply(self, config: &mut Config) {
        match self {
            Self::Required => {
                config.encryption(EncryptionLevel::Required);
                config.trust_cert();
            }
            Self::LoginOnly => config.encryption(EncryptionLevel::Off),
            Self::Disabled => config.encryption(EncryptionLevel::NotSupported),
        }
    }
}

/// Driver backed by the tiberius TDS client.
#[derive(Debug, Default)]
pub struct TdsDriver;

impl TdsDriver {
    /// Creates the driver.
    pub const fn new() -> Self {
        Self
    }

    /// Builds the client config for a target.
    ///
    /// # Errors
    /// Returns [`DriverError::DriverNotFound`] for an unknown driver name
    /// and [`DriverError::InvalidParameters`] for an unparseable
    /// connection string.
    pub fn build_config(target: &ConnectionTarget) -> DriverResult<Config> {
        match target {
            ConnectionTarget::Profile(profile) => Self::profile_config(profile),
            ConnectionTarget::ConnectionString(value) => {
                let mut config = Config::from_ado_string(value).map_err(|_| {
                    DriverError::InvalidParameters("connection string could not be parsed".into())
                })?;
                config.application_name(APPLICATION_NAME);
                Ok(config)
            }
        }
    }

    fn profile_config(profile: &ConnectionProfile) -> DriverResult<Config> {
        let tls = TlsMode::for_driver(&profile.driver)
            .ok_or_else(|| DriverError::DriverNotFound(profile.driver.clone()))?;
        if profile.host.trim().is_empty() {
            return Err(DriverError::InvalidParameters("host cannot be empty".into()));
        }

        let mut config = Config::new();
        config.host(&profile.host);
        config.port(profile.port);
        config.authentication(AuthMethod::sql_server(&profile.user, profile.password()));
        if !profile.database.is_empty() {
            config.database(&profile.database);
        }
        config.application_name(APPLICATION_NAME);
        tls.apply(&mut config);
        Ok(config)
    }
}

impl Driver for TdsDriver {
    fn name(&self) -> &'static str {
        "tds"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn connect(
        &self,
        target: &ConnectionTarget,
        timeout: Duration,
    ) -> DriverResult<Box<dyn Connection>> {
        let config = Self::build_config(target)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DriverError::Other(format!("failed to start driver runtime: {e}")))?;

        // The timer must be created inside the runtime, hence the async block.
        let client = runtime.block_on(async {
            match tokio::time::timeout(timeout, open_client(config)).await {
                Ok(result) => result,
                Err(_) => Err(DriverError::Timeout(timeout)),
            }
        })?;

        Ok(Box::new(TdsConnection { client, runtime }))
    }
}

async fn open_client(mut config: Config) -> DriverResult<Client<Compat<TcpStream>>> {
    match connect_once(config.clone()).await {
        Err(tiberius::error::Error::Routing { host, port }) => {
            debug!("Server redirected the connection to {}:{}", host, port);
            config.host(&host);
            config.port(port);
            connect_once(config).await.map_err(classify)
        }
        other => other.map_err(classify),
    }
}

async fn connect_once(
    config: Config,
) -> Result<Client<Compat<TcpStream>>, tiberius::error::Error> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;
    Client::connect(config, tcp.compat_write()).await
}

/// Maps a tiberius error onto the structured driver error.
fn classify(error: tiberius::error::Error) -> DriverError {
    match error {
        tiberius::error::Error::Server(token) => {
            classify_server_code(token.code(), token.message())
        }
        tiberius::error::Error::Io { kind, message } => {
            DriverError::Unreachable(format!("{kind:?}: {message}"))
        }
        tiberius::error::Error::Tls(message) => {
            DriverError::Other(format!("TLS negotiation failed: {message}"))
        }
        other => DriverError::Other(other.to_string()),
    }
}

/// Maps a SQL Server error number onto the structured driver error.
pub fn classify_server_code(code: u32, message: &str) -> DriverError {
    match code {
        LOGIN_FAILED => DriverError::LoginFailed { code },
        DATABASE_UNAVAILABLE => DriverError::DatabaseUnavailable { code },
        _ => DriverError::Server {
            code,
            message: message.to_string(),
        },
    }
}

/// A live TDS connection with its own runtime.
pub struct TdsConnection {
    // Field order matters: the client must drop before its runtime.
    client: Client<Compat<TcpStream>>,
    runtime: Runtime,
}

impl Connection for TdsConnection {
    fn execute(&mut self, sql: &str) -> DriverResult<u64> {
        let client = &mut self.client;
        self.runtime.block_on(async {
            let result = client.execute(sql, &[]).await.map_err(classify)?;
            Ok::<_, DriverError>(result.total())
        })
    }

    fn query_scalar(&mut self, sql: &str) -> DriverResult<Option<i64>> {
        let client = &mut self.client;
        self.runtime.block_on(async {
            let row = client
                .simple_query(sql)
                .await
                .map_err(classify)?
                .into_row()
                .await
                .map_err(classify)?;
            match row {
                Some(row) => row.try_get::<i64, _>(0).map_err(classify),
                None => Ok::<_, DriverError>(None),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn profile(driver: &str) -> ConnectionTarget {
        ConnectionTarget::Profile(ConnectionProfile::new(
            "localhost",
            1433,
            "sa",
            "secret",
            "pipeline_test",
            driver,
        ))
    }

    #[test]
    fn test_tls_mode_by_driver_name() {
        assert_eq!(
            TlsMode::for_driver("ODBC Driver 18 for SQL Server"),
            Some(TlsMode::Required)
        );
        assert_eq!(
            TlsMode::for_driver("ODBC Driver 17 for SQL Server"),
            Some(TlsMode::LoginOnly)
        );
        assert_eq!(TlsMode::for_driver("SQL Server"), Some(TlsMode::Disabled));
        assert_eq!(TlsMode::for_driver("ODBC Driver 13 for SQL Server"), None);
    }

    #[test]
    fn test_build_config_for_profile() {
        let config = TdsDriver::build_config(&profile("ODBC Driver 17 for SQL Server")).unwrap();
        assert_eq!(config.get_addr(), "localhost:1433");
    }

    #[test]
    fn test_unknown_driver_is_not_found() {
        let err = TdsDriver::build_config(&profile("FreeTDS")).err().unwrap();
        assert_eq!(err, DriverError::DriverNotFound("FreeTDS".to_string()));

        // connect() must fail the same way without touching the network
        let err = TdsDriver::new()
            .connect(&profile("FreeTDS"), Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, DriverError::DriverNotFound(_)));
    }

    #[test]
    fn test_build_config_from_connection_string() {
        let target = ConnectionTarget::connection_string(
            "Server=tcp:db.internal,14330;User Id=sa;Password=secret;Database=x",
        );
        let config = TdsDriver::build_config(&target).unwrap();
        assert_eq!(config.get_addr(), "db.internal:14330");
    }

    #[test]
    fn test_classify_server_codes() {
        assert_eq!(
            classify_server_code(18456, "Login failed for user 'sa'."),
            DriverError::LoginFailed { code: 18456 }
        );
        assert_eq!(
            classify_server_code(4060, "Cannot open database"),
            DriverError::DatabaseUnavailable { code: 4060 }
        );
        assert!(matches!(
            classify_server_code(208, "Invalid object name"),
            DriverError::Server { code: 208, .. }
        ));
    }

    #[test]
    fn test_classify_io_as_unreachable() {
        let err = classify(tiberius::error::Error::Io {
            kind: std::io::ErrorKind::ConnectionRefused,
            message: "connection refused".to_string(),
        });
        assert!(matches!(err, DriverError::Unreachable(_)));
    }

    #[test]
    fn test_refused_port_is_unreachable() {
        // Bind then drop to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let target = ConnectionTarget::Profile(ConnectionProfile::new(
            "127.0.0.1",
            port,
            "sa",
            "secret",
            "master",
            "SQL Server",
        ));

        let err = TdsDriver::new()
            .connect(&target, Duration::from_secs(2))
            .err()
            .unwrap();
        assert!(
            matches!(err, DriverError::Unreachable(_) | DriverError::Timeout(_)),
            "unexpected error: {err:?}"
        );
    }
}
