//! The bootstrap service and its process-wide instance.
//!
//! [`Environment`] ties the pieces together: discovery through the
//! readiness waiter, provisioning through the external initializer and the
//! fixture seeder, and the run-once gate in front of all of it. Tests can
//! build their own `Environment` with an injected driver; production code
//! uses [`ensure_environment_ready`] and [`get_connection`], which share one
//! instance built from the process environment.

use crate::config::BootstrapConfig;
use crate::driver::{Connection, Driver, is_driver_library_available, select_driver};
use crate::error::{BootstrapError, Result};
use crate::fixtures::{
    FixtureTableSpec, SeedReport, ValidationResult, default_fixtures, ensure_minimal_fixtures,
    load_fixtures_file,
};
use crate::gate::{BootstrapFailure, InitGate, Readiness, ResolvedStore};
use crate::initializer::{ExternalInitializer, InitializerStatus};
use crate::matrix::CandidateMatrix;
use crate::probe::{MatrixPass, probe_matrix};
use crate::profile::ConnectionTarget;
use crate::readiness::{ResolvedCandidate, Sleeper, WaitPolicy, thread_sleeper, wait_until_ready};
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};

/// Once-per-process test environment bootstrap.
pub struct Environment {
    config: BootstrapConfig,
    driver: Arc<dyn Driver>,
    fixtures: Vec<FixtureTableSpec>,
    sleeper: Sleeper,
    gate: InitGate,
    resolved: ResolvedStore,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("config", &self.config)
            .field("driver", &self.driver.name())
            .field("fixtures", &self.fixtures.len())
            .field("gate", &self.gate)
            .field("resolved", &self.resolved)
            .finish_non_exhaustive()
    }
}

impl Environment {
    /// Creates an environment with an explicit driver and the built-in fixtures.
    pub fn new(config: BootstrapConfig, driver: Arc<dyn Driver>) -> Self {
        Self {
            config,
            driver,
            fixtures: default_fixtures(),
            sleeper: thread_sleeper(),
            gate: InitGate::new(),
            resolved: ResolvedStore::new(),
        }
    }

    /// Creates an environment using the driver compiled into this build.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the fixtures
    /// file cannot be loaded.
    pub fn from_config(config: BootstrapConfig) -> Result<Self> {
        config.validate()?;
        let fixtures = match &config.fixtures_file {
            Some(path) => load_fixtures_file(path)?,
            None => default_fixtures(),
        };
        Ok(Self::new(config, select_driver()).with_fixtures(fixtures))
    }

    /// Creates an environment from the process environment.
    ///
    /// # Errors
    /// See [`BootstrapConfig::from_env`] and [`Environment::from_config`].
    pub fn from_env() -> Result<Self> {
        Self::from_config(BootstrapConfig::from_env()?)
    }

    /// Builder method replacing the fixture contract.
    #[must_use]
    pub fn with_fixtures(mut self, fixtures: Vec<FixtureTableSpec>) -> Self {
        self.fixtures = fixtures;
        self
    }

    /// Builder method replacing the sleep used between readiness attempts.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Configuration in use.
    pub const fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Fixture contract in use.
    pub fn fixtures(&self) -> &[FixtureTableSpec] {
        &self.fixtures
    }

    /// Whether the selected driver can connect at all.
    pub fn is_driver_available(&self) -> bool {
        self.driver.is_available()
    }

    /// Candidate matrix for the current configuration.
    pub fn matrix(&self) -> CandidateMatrix {
        CandidateMatrix::from_config(&self.config)
    }

    /// Retry budget for the current configuration.
    pub const fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            max_attempts: self.config.ready_max_attempts,
            delay: self.config.ready_delay,
            probe_timeout: self.config.probe_timeout,
        }
    }

    /// Runs one matrix pass without waiting or promoting anything.
    pub fn probe_pass(&self) -> MatrixPass {
        probe_matrix(self.driver.as_ref(), &self.matrix(), self.config.probe_timeout)
    }

    /// Discovers a working candidate, waiting for the server if needed.
    ///
    /// Does not touch the gate or the resolved store.
    ///
    /// # Errors
    /// Returns [`BootstrapError::DriverUnavailable`] without a driver, or
    /// [`BootstrapError::ReadinessTimeout`] when nothing connects.
    pub fn resolve(&self) -> Result<ResolvedCandidate> {
        if !self.driver.is_available() {
            return Err(BootstrapError::DriverUnavailable);
        }
        let matrix = self.matrix();
        info!("Probing {} connection candidate(s)", matrix.len());
        wait_until_ready(
            self.driver.as_ref(),
            &matrix,
            self.wait_policy(),
            &self.sleeper,
        )
    }

    /// Runs the bootstrap once per environment and returns its outcome.
    ///
    /// Safe to call from many threads; every caller gets the same outcome.
    pub fn ensure_ready(&self) -> Readiness {
        self.gate.ensure_with(|| self.bootstrap())
    }

    /// Decided outcome, if the bootstrap has finished.
    pub fn outcome(&self) -> Option<Readiness> {
        self.gate.outcome()
    }

    /// Target promoted by a successful bootstrap.
    pub fn resolved_target(&self) -> Option<&ConnectionTarget> {
        self.resolved.get()
    }

    /// Opens a new connection to the resolved target.
    ///
    /// # Errors
    /// Returns [`BootstrapError::DriverUnavailable`] without a driver,
    /// [`BootstrapError::NotReady`] before a successful bootstrap, and
    /// [`BootstrapError::Connection`] if the connect itself fails.
    pub fn connection(&self) -> Result<Box<dyn Connection>> {
        if !self.driver.is_available() {
            return Err(BootstrapError::DriverUnavailable);
        }

        let Some(target) = self.resolved.get() else {
            let reason = match self.gate.outcome() {
                Some(Readiness::Failed(failure)) => format!("bootstrap {failure}"),
                Some(Readiness::Skipped { reason }) => reason,
                _ => "the bootstrap has not completed".to_string(),
            };
            return Err(BootstrapError::not_ready(reason));
        };

        self.driver
            .connect(target, self.config.probe_timeout)
            .map_err(|e| BootstrapError::connection(format!("failed to connect to {target}"), e))
    }

    /// Checks the fixture contract.
    ///
    /// Uses the resolved target when there is one and discovers a candidate
    /// otherwise. Connection problems are reported inside the result.
    pub fn validate(&self) -> ValidationResult {
        match self.inspection_connection() {
            Ok(mut conn) => crate::fixtures::validate(conn.as_mut(), &self.fixtures),
            Err(e) => ValidationResult {
                error: Some(e.to_string()),
                ..ValidationResult::default()
            },
        }
    }

    /// Creates whatever part of the fixture contract is missing.
    ///
    /// # Errors
    /// Returns an error if no connection can be made or seeding fails.
    pub fn seed(&self) -> Result<SeedReport> {
        let mut conn = self.inspection_connection()?;
        ensure_minimal_fixtures(conn.as_mut(), &self.fixtures)
    }

    fn inspection_connection(&self) -> Result<Box<dyn Connection>> {
        if self.resolved.is_resolved() {
            self.connection()
        } else {
            self.resolve().map(|resolved| resolved.connection)
        }
    }

    fn bootstrap(&self) -> Readiness {
        if !self.driver.is_available() {
            let reason = BootstrapError::DriverUnavailable.to_string();
            warn!("{}; database-dependent tests will be skipped", reason);
            return Readiness::Skipped { reason };
        }

        match self.run_bootstrap() {
            Ok(target) => {
                info!("Test environment ready: {}", target);
                Readiness::Ready(target)
            }
            Err(e) => {
                error!("Bootstrap failed at {} stage: {}", e.stage(), e);
                Readiness::Failed(BootstrapFailure::from(&e))
            }
        }
    }

    fn run_bootstrap(&self) -> Result<ConnectionTarget> {
        let ResolvedCandidate {
            candidate,
            attempt,
            mut connection,
        } = self.resolve()?;
        info!("Candidate {} connected on attempt {}", candidate.label(), attempt);

        self.provision(&candidate.target, connection.as_mut())?;

        let target = self.resolved.promote(candidate.target)?;
        Ok(target.clone())
    }

    /// Runs the initializer, then the seeder according to the error policy.
    fn provision(&self, target: &ConnectionTarget, conn: &mut dyn Connection) -> Result<()> {
        let status = match &self.config.init_script {
            Some(path) => ExternalInitializer::new(path)
                .with_timeout(self.config.init_timeout)
                .with_target(target)
                .run(),
            None => {
                info!("No initializer configured; assuming the database is already provisioned");
                Ok(InitializerStatus::Missing)
            }
        };

        match status {
            Ok(InitializerStatus::Completed(_)) => {
                // The initializer is the authoritative path; the seeder only tops up.
                if let Err(e) = ensure_minimal_fixtures(conn, &self.fixtures) {
                    warn!("Fixture check after initializer failed, continuing: {}", e);
                }
                Ok(())
            }
            Ok(InitializerStatus::Missing) => {
                ensure_minimal_fixtures(conn, &self.fixtures).map(|_| ())
            }
            Err(init_error) if self.config.seed_after_initializer_failure => {
                warn!("Initializer failed, falling back to fixture seeder: {}", init_error);
                match ensure_minimal_fixtures(conn, &self.fixtures) {
                    Ok(_) => Ok(()),
                    Err(seed_error) => {
                        warn!("Fixture seeder fallback failed: {}", seed_error);
                        Err(init_error)
                    }
                }
            }
            Err(init_error) => Err(init_error),
        }
    }
}

static GLOBAL: OnceLock<std::result::Result<Environment, BootstrapFailure>> = OnceLock::new();

/// Process-wide environment built from environment variables on first use.
///
/// # Errors
/// Returns the configuration failure if the environment could not be built;
/// the same failure is returned on every call.
pub fn global() -> std::result::Result<&'static Environment, BootstrapFailure> {
    GLOBAL
        .get_or_init(|| Environment::from_env().map_err(BootstrapFailure::from))
        .as_ref()
        .map_err(Clone::clone)
}

/// Bootstraps the process-wide environment once and returns the outcome.
///
/// Call it from every test fixture that needs the database; only the first
/// call does any work. Without a driver the outcome is always a skip, even
/// when the environment variables are unusable.
pub fn ensure_environment_ready() -> Readiness {
    if !is_driver_library_available() {
        return Readiness::Skipped {
            reason: BootstrapError::DriverUnavailable.to_string(),
        };
    }
    match global() {
        Ok(environment) => environment.ensure_ready(),
        Err(failure) => Readiness::Failed(failure),
    }
}

/// Opens a connection to the process-wide resolved target.
///
/// # Errors
/// Returns [`BootstrapError::DriverUnavailable`] without a driver; otherwise
/// see [`Environment::connection`]. A configuration failure is reported as
/// [`BootstrapError::NotReady`].
pub fn get_connection() -> Result<Box<dyn Connection>> {
    if !is_driver_library_available() {
        return Err(BootstrapError::DriverUnavailable);
    }
    let environment =
        global().map_err(|failure| BootstrapError::not_ready(format!("bootstrap {failure}")))?;
    environment.connection()
}
