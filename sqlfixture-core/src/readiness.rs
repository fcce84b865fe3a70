//! Readiness waiter.
//!
//! Turns a database that may still be booting into a confirmed-ready one
//! by running full matrix passes with a fixed delay in between.

use crate::driver::{Connection, Driver};
use crate::error::{BootstrapError, Result};
use crate::matrix::{Candidate, CandidateMatrix};
use crate::probe::probe_matrix;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Sleep function used between attempts.
pub type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// Sleeper that blocks the calling thread.
pub fn thread_sleeper() -> Sleeper {
    Arc::new(std::thread::sleep)
}

/// Retry budget for [`wait_until_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Full matrix passes before giving up
    pub max_attempts: u32,
    /// Sleep between passes
    pub delay: Duration,
    /// Connect timeout for each probe
    pub probe_timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            delay: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// The candidate that won, with the connection it opened.
pub struct ResolvedCandidate {
    /// Winning candidate
    pub candidate: Candidate,
    /// 1-based attempt on which it connected
    pub attempt: u32,
    /// Connection opened by the winning probe
    pub connection: Box<dyn Connection>,
}

impl std::fmt::Debug for ResolvedCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCandidate")
            .field("candidate", &self.candidate)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// Runs matrix passes until a candidate connects or attempts run out.
///
/// Sleeps `policy.delay` between attempts, never after the last one.
///
/// # Errors
/// Returns [`BootstrapError::ReadinessTimeout`] carrying the final pass's
/// rejections when no candidate connects.
pub fn wait_until_ready(
    driver: &dyn Driver,
    matrix: &CandidateMatrix,
    policy: WaitPolicy,
    sleeper: &Sleeper,
) -> Result<ResolvedCandidate> {
    let mut last_rejections = Vec::new();

    for attempt in 1..=policy.max_attempts {
        let pass = probe_matrix(driver, matrix, policy.probe_timeout);
        if let Some((candidate, connection)) = pass.winner {
            info!("Resolved {} on attempt {}", candidate.label(), attempt);
            return Ok(ResolvedCandidate {
                candidate,
                attempt,
                connection,
            });
        }

        last_rejections = pass.rejections();
        debug!(
            "Attempt {}/{}: no candidate connected ({} probe(s))",
            attempt,
            policy.max_attempts,
            pass.records.len()
        );

        if attempt < policy.max_attempts {
            sleeper(policy.delay);
        }
    }

    Err(BootstrapError::ReadinessTimeout {
        attempts: policy.max_attempts,
        last_rejections,
    })
}
