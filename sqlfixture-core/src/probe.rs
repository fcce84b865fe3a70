//! Connection prober.
//!
//! A probe is one bounded connection attempt. Its result is a
//! [`ProbeOutcome`] returned by value: the matrix loop branches on the tag
//! and never inspects error text.

use crate::driver::{Connection, Driver, DriverError};
use crate::error::BootstrapError;
use crate::matrix::{Candidate, CandidateMatrix};
use crate::profile::ConnectionTarget;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

/// Result of a single probe.
pub enum ProbeOutcome {
    /// The candidate connected and answered a ping
    Connected(Box<dyn Connection>),
    /// The candidate's driver is not installed
    DriverNotFound,
    /// The driver is present but the candidate did not work
    Rejected(DriverError),
}

impl ProbeOutcome {
    /// Whether this outcome is [`ProbeOutcome::Connected`].
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

impl std::fmt::Debug for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected(_) => f.write_str("Connected"),
            Self::DriverNotFound => f.write_str("DriverNotFound"),
            Self::Rejected(reason) => f.debug_tuple("Rejected").field(reason).finish(),
        }
    }
}

/// Tries one target once.
///
/// A connection that opens but fails its ping counts as rejected.
pub fn probe(driver: &dyn Driver, target: &ConnectionTarget, timeout: Duration) -> ProbeOutcome {
    match driver.connect(target, timeout) {
        Ok(mut conn) => match conn.ping() {
            Ok(()) => ProbeOutcome::Connected(conn),
            Err(e) => ProbeOutcome::Rejected(e),
        },
        Err(DriverError::DriverNotFound(_)) => ProbeOutcome::DriverNotFound,
        Err(e) => ProbeOutcome::Rejected(e),
    }
}

/// Tag-only view of a [`ProbeOutcome`], kept for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    /// Connected; ends the pass
    Connected,
    /// Driver missing; rest of this driver's candidates skipped
    DriverNotFound,
    /// Rejected with the given reason
    Rejected(DriverError),
}

/// One probe made during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRecord {
    /// Log-safe candidate label
    pub label: String,
    /// Driver name of the candidate, if any
    pub driver: Option<String>,
    /// What happened
    pub status: ProbeStatus,
}

impl ProbeRecord {
    /// Bootstrap-level error for an unsuccessful probe.
    pub fn to_error(&self) -> Option<BootstrapError> {
        match &self.status {
            ProbeStatus::Connected => None,
            ProbeStatus::DriverNotFound => Some(BootstrapError::DriverNotFoundForCandidate {
                driver: self.driver.clone().unwrap_or_else(|| self.label.clone()),
            }),
            ProbeStatus::Rejected(reason) => Some(BootstrapError::CredentialRejected {
                candidate: self.label.clone(),
                reason: reason.to_string(),
            }),
        }
    }
}

/// Result of one full pass over the matrix.
#[derive(Default)]
pub struct MatrixPass {
    /// First candidate that connected, with its open connection
    pub winner: Option<(Candidate, Box<dyn Connection>)>,
    /// Every probe made, in matrix order
    pub records: Vec<ProbeRecord>,
}

impl std::fmt::Debug for MatrixPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixPass")
            .field("winner", &self.winner.as_ref().map(|(candidate, _)| candidate))
            .field("records", &self.records)
            .finish()
    }
}

impl MatrixPass {
    /// Messages for the unsuccessful probes of this pass.
    pub fn rejections(&self) -> Vec<String> {
        self.records
            .iter()
            .filter_map(ProbeRecord::to_error)
            .map(|e| e.to_string())
            .collect()
    }
}

/// Probes candidates in matrix order until one connects.
///
/// After a [`ProbeOutcome::DriverNotFound`] the remaining candidates for
/// that driver name are skipped for the rest of the pass.
pub fn probe_matrix(driver: &dyn Driver, matrix: &CandidateMatrix, timeout: Duration) -> MatrixPass {
    let mut pass = MatrixPass::default();
    let mut missing_drivers: HashSet<String> = HashSet::new();

    for candidate in matrix.candidates() {
        if let Some(name) = candidate.driver()
            && missing_drivers.contains(name)
        {
            continue;
        }

        let label = candidate.label();
        let driver_name = candidate.driver().map(ToString::to_string);
        match probe(driver, &candidate.target, timeout) {
            ProbeOutcome::Connected(conn) => {
                debug!("Probe connected: {}", label);
                pass.records.push(ProbeRecord {
                    label,
                    driver: driver_name,
                    status: ProbeStatus::Connected,
                });
                pass.winner = Some((candidate.clone(), conn));
                break;
            }
            ProbeOutcome::DriverNotFound => {
                debug!("Probe skipped driver, not installed: {}", label);
                if let Some(name) = &driver_name {
                    missing_drivers.insert(name.clone());
                }
                pass.records.push(ProbeRecord {
                    label,
                    driver: driver_name,
                    status: ProbeStatus::DriverNotFound,
                });
            }
            ProbeOutcome::Rejected(reason) => {
                debug!("Probe rejected: {}: {}", label, reason);
                pass.records.push(ProbeRecord {
                    label,
                    driver: driver_name,
                    status: ProbeStatus::Rejected(reason),
                });
            }
        }
    }

    pass
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::BootstrapConfig;
    use crate::driver::{DriverResult, LOGIN_FAILED};
    use std::sync::Mutex;

    struct NullConnection;

    impl Connection for NullConnection {
        fn execute(&mut self, _sql: &str) -> DriverResult<u64> {
            Ok(0)
        }

        fn query_scalar(&mut self, _sql: &str) -> DriverResult<Option<i64>> {
            Ok(Some(1))
        }
    }

    /// Accepts one (driver, password) pair; knows only the listed drivers.
    struct PickyDriver {
        installed: Vec<&'static str>,
        accept: (&'static str, &'static str),
        attempts: Mutex<Vec<String>>,
    }

    impl Driver for PickyDriver {
        fn name(&self) -> &'static str {
            "picky"
        }

        fn is_available(&self) -> bool {
            true
        }

        fn connect(
            &self,
            target: &ConnectionTarget,
            _timeout: Duration,
        ) -> DriverResult<Box<dyn Connection>> {
            let profile = target.profile().unwrap();
            self.attempts.lock().unwrap().push(format!(
                "{}/{}",
                profile.driver,
                profile.password()
            ));
            if !self.installed.contains(&profile.driver.as_str()) {
                return Err(DriverError::DriverNotFound(profile.driver.clone()));
            }
            if (profile.driver.as_str(), profile.password()) == self.accept {
                Ok(Box::new(NullConnection))
            } else {
                Err(DriverError::LoginFailed { code: LOGIN_FAILED })
            }
        }
    }

    fn matrix() -> CandidateMatrix {
        CandidateMatrix::from_config(
            &BootstrapConfig::new("localhost")
                .with_drivers(["v18", "v17"])
                .with_databases(["db1"])
                .with_passwords(["p1", "p2"]),
        )
    }

    #[test]
    fn test_first_success_ends_pass() {
        let driver = PickyDriver {
            installed: vec!["v18", "v17"],
            accept: ("v18", "p2"),
            attempts: Mutex::new(Vec::new()),
        };

        let pass = probe_matrix(&driver, &matrix(), Duration::from_secs(1));
        let (winner, _) = pass.winner.as_ref().unwrap();
        assert_eq!(winner.driver(), Some("v18"));
        assert_eq!(winner.password_rank, 1);
        assert_eq!(*driver.attempts.lock().unwrap(), vec!["v18/p1", "v18/p2"]);
        assert_eq!(pass.records.len(), 2);
        assert_eq!(pass.records[1].status, ProbeStatus::Connected);
    }

    #[test]
    fn test_driver_not_found_skips_rest_of_driver() {
        let driver = PickyDriver {
            installed: vec!["v17"],
            accept: ("v17", "p2"),
            attempts: Mutex::new(Vec::new()),
        };

        let pass = probe_matrix(&driver, &matrix(), Duration::from_secs(1));
        assert!(pass.winner.is_some());
        // v18/p2 never attempted
        assert_eq!(
            *driver.attempts.lock().unwrap(),
            vec!["v18/p1", "v17/p1", "v17/p2"]
        );
        assert_eq!(pass.records[0].status, ProbeStatus::DriverNotFound);
        assert!(matches!(
            pass.records[0].to_error(),
            Some(BootstrapError::DriverNotFoundForCandidate { ref driver }) if driver == "v18"
        ));
    }

    #[test]
    fn test_rejections_are_reported_without_passwords() {
        let driver = PickyDriver {
            installed: vec!["v18", "v17"],
            accept: ("none", "none"),
            attempts: Mutex::new(Vec::new()),
        };

        let pass = probe_matrix(&driver, &matrix(), Duration::from_secs(1));
        assert!(pass.winner.is_none());

        let rejections = pass.rejections();
        assert_eq!(rejections.len(), 4);
        assert!(rejections[0].contains("Login failed"));
        assert!(rejections.iter().all(|r| !r.contains("p1") && !r.contains("p2")));
    }

    #[test]
    fn test_ping_failure_counts_as_rejection() {
        struct DeadConnection;
        impl Connection for DeadConnection {
            fn execute(&mut self, _sql: &str) -> DriverResult<u64> {
                Ok(0)
            }
            fn query_scalar(&mut self, _sql: &str) -> DriverResult<Option<i64>> {
                Err(DriverError::Unreachable("reset by peer".to_string()))
            }
        }
        struct DeadDriver;
        impl Driver for DeadDriver {
            fn name(&self) -> &'static str {
                "dead"
            }
            fn is_available(&self) -> bool {
                true
            }
            fn connect(
                &self,
                _target: &ConnectionTarget,
                _timeout: Duration,
            ) -> DriverResult<Box<dyn Connection>> {
                Ok(Box::new(DeadConnection))
            }
        }

        let target = ConnectionTarget::connection_string("Server=x;");
        let outcome = probe(&DeadDriver, &target, Duration::from_secs(1));
        assert!(matches!(outcome, ProbeOutcome::Rejected(DriverError::Unreachable(_))));
        assert!(!outcome.is_connected());
    }
}
