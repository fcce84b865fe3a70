//! Connection candidate matrix.
//!
//! The matrix is the cross product `drivers × databases × passwords`,
//! iterated driver first, then database, then password. Host, port, and
//! user are fixed from configuration. A configured connection string
//! replaces the whole matrix with a single verbatim candidate.

use crate::config::BootstrapConfig;
use crate::profile::{ConnectionProfile, ConnectionTarget};

/// One entry of the matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// What to connect to
    pub target: ConnectionTarget,
    /// Position of the password in the candidate list, for logs that must
    /// not show the password itself
    pub password_rank: usize,
}

impl Candidate {
    /// Driver name, if this candidate came from the matrix.
    pub fn driver(&self) -> Option<&str> {
        self.target.driver()
    }

    /// Log-safe label, e.g. `[ODBC Driver 18 for SQL Server] sa@localhost:1433/master (password #2)`.
    pub fn label(&self) -> String {
        match &self.target {
            ConnectionTarget::Profile(profile) => {
                format!("{profile} (password #{})", self.password_rank.saturating_add(1))
            }
            ConnectionTarget::ConnectionString(_) => self.target.to_string(),
        }
    }
}

/// Ordered list of candidates probed on every readiness attempt.
#[derive(Debug, Clone, Default)]
pub struct CandidateMatrix {
    candidates: Vec<Candidate>,
}

impl CandidateMatrix {
    /// Builds the matrix from configuration.
    pub fn from_config(config: &BootstrapConfig) -> Self {
        if let Some(connection_string) = config.connection_string() {
            return Self::verbatim(ConnectionTarget::connection_string(connection_string));
        }

        let passwords: Vec<&str> = config.passwords().collect();
        let mut candidates = Vec::with_capacity(
            config
                .drivers
                .len()
                .saturating_mul(config.databases.len())
                .saturating_mul(passwords.len()),
        );

        for driver in &config.drivers {
            for database in &config.databases {
                for (password_rank, password) in passwords.iter().enumerate() {
                    candidates.push(Candidate {
                        target: ConnectionTarget::Profile(ConnectionProfile::new(
                            &config.host,
                            config.port,
                            &config.user,
                            *password,
                            database,
                            driver,
                        )),
                        password_rank,
                    });
                }
            }
        }

        Self { candidates }
    }

    /// A matrix holding exactly one target.
    pub fn verbatim(target: ConnectionTarget) -> Self {
        Self {
            candidates: vec![Candidate {
                target,
                password_rank: 0,
            }],
        }
    }

    /// A matrix over explicit candidates, kept in the given order.
    pub const fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }

    /// Candidates in probe order.
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether the matrix has no candidates.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}
