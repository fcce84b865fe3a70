//! Global initialization gate and resolved-state store.
//!
//! [`InitGate`] runs the bootstrap at most once. Its mutex spans the whole
//! bootstrap, so a caller that arrives while another is initializing blocks
//! until the outcome is decided and then sees that same outcome.
//!
//! ```text
//! Uninitialized ──▶ Initializing ──▶ Decided(Ready | Skipped | Failed)
//! ```
//!
//! A decided outcome is terminal; a failed bootstrap is not retried.

use crate::error::{BootstrapError, BootstrapStage, Result};
use crate::profile::ConnectionTarget;
use serde::Serialize;
use std::sync::{Mutex, OnceLock};
use tracing::{error, warn};

/// Why the bootstrap failed, in a form every caller can share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapFailure {
    /// Stage that failed
    pub stage: BootstrapStage,
    /// Sanitized error message
    pub message: String,
    /// Captured output or rejection list, if any
    pub diagnostics: Option<String>,
}

impl BootstrapFailure {
    /// Creates a failure without diagnostics.
    pub fn new(stage: BootstrapStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            diagnostics: None,
        }
    }
}

impl From<&BootstrapError> for BootstrapFailure {
    fn from(error: &BootstrapError) -> Self {
        Self {
            stage: error.stage(),
            message: error.to_string(),
            diagnostics: error.diagnostics(),
        }
    }
}

impl From<BootstrapError> for BootstrapFailure {
    fn from(error: BootstrapError) -> Self {
        Self::from(&error)
    }
}

impl std::fmt::Display for BootstrapFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} stage failed: {}", self.stage, self.message)
    }
}

/// Final outcome of the bootstrap, shared by every caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The database is reachable and seeded
    Ready(ConnectionTarget),
    /// The driver is unavailable; database tests should skip
    Skipped {
        /// Why the bootstrap did not run
        reason: String,
    },
    /// The bootstrap failed; database tests should skip with this diagnostic
    Failed(BootstrapFailure),
}

impl Readiness {
    /// `true` for ready and skipped outcomes.
    ///
    /// A skip is success-like: non-database tests keep running and
    /// database tests skip themselves.
    pub const fn is_usable(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    /// `true` only when a connection target is available.
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Resolved target, when ready.
    pub const fn target(&self) -> Option<&ConnectionTarget> {
        match self {
            Self::Ready(target) => Some(target),
            _ => None,
        }
    }

    /// Message a database test should skip with, or `None` when ready.
    pub fn skip_message(&self) -> Option<String> {
        match self {
            Self::Ready(_) => None,
            Self::Skipped { reason } => Some(format!("database tests skipped: {reason}")),
            Self::Failed(failure) => Some(format!(
                "database tests skipped: bootstrap {failure}"
            )),
        }
    }
}

/// States of the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    /// Nobody has called [`InitGate::ensure_with`] yet
    Uninitialized,
    /// A bootstrap is running (or panicked while running)
    Initializing,
    /// Terminal outcome
    Decided(Readiness),
}

/// Run-once latch around the bootstrap.
#[derive(Debug)]
pub struct InitGate {
    state: Mutex<GateState>,
}

impl Default for InitGate {
    fn default() -> Self {
        Self::new()
    }
}

impl InitGate {
    /// Creates an undecided gate.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Uninitialized),
        }
    }

    /// Runs `bootstrap` if no outcome is decided yet, then returns the outcome.
    ///
    /// The lock is held for the duration of `bootstrap`; concurrent callers
    /// wait and receive the same outcome. If a previous bootstrap panicked,
    /// the outcome becomes [`Readiness::Failed`] at [`BootstrapStage::Gate`].
    pub fn ensure_with<F>(&self, bootstrap: F) -> Readiness
    where
        F: FnOnce() -> Readiness,
    {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Initialization gate was poisoned by a panicking bootstrap");
                poisoned.into_inner()
            }
        };

        match &*state {
            GateState::Decided(outcome) => return outcome.clone(),
            GateState::Initializing => {
                let outcome = Readiness::Failed(BootstrapFailure::new(
                    BootstrapStage::Gate,
                    "a previous bootstrap attempt panicked",
                ));
                error!("Bootstrap failed: a previous attempt panicked");
                *state = GateState::Decided(outcome.clone());
                return outcome;
            }
            GateState::Uninitialized => {}
        }

        *state = GateState::Initializing;
        let outcome = bootstrap();
        *state = GateState::Decided(outcome.clone());
        outcome
    }

    /// Current state, without waiting for a running bootstrap to finish.
    ///
    /// Returns `None` while another thread holds the gate.
    pub fn peek(&self) -> Option<GateState> {
        match self.state.try_lock() {
            Ok(state) => Some(state.clone()),
            Err(std::sync::TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner().clone()),
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }

    /// Decided outcome, if any.
    pub fn outcome(&self) -> Option<Readiness> {
        match self.peek() {
            Some(GateState::Decided(outcome)) => Some(outcome),
            _ => None,
        }
    }
}

/// Holds the single resolved connection target of this process.
///
/// Written once by the bootstrap, then read without locking.
#[derive(Debug, Default)]
pub struct ResolvedStore {
    target: OnceLock<ConnectionTarget>,
}

impl ResolvedStore {
    /// Creates an empty store.
    pub const fn new() -> Self {
        Self {
            target: OnceLock::new(),
        }
    }

    /// Records `target` as the resolved target.
    ///
    /// Promoting the same target again is accepted.
    ///
    /// # Errors
    /// Returns [`BootstrapError::AlreadyResolved`] if a different target
    /// is already stored.
    pub fn promote(&self, target: ConnectionTarget) -> Result<&ConnectionTarget> {
        match self.target.set(target) {
            Ok(()) => {}
            Err(rejected) => {
                let existing = self.target.get();
                if existing != Some(&rejected) {
                    return Err(BootstrapError::AlreadyResolved {
                        existing: existing.map(ToString::to_string).unwrap_or_default(),
                    });
                }
            }
        }
        self.target
            .get()
            .ok_or_else(|| BootstrapError::not_ready("resolved target vanished"))
    }

    /// Resolved target, if the bootstrap got that far.
    pub fn get(&self) -> Option<&ConnectionTarget> {
        self.target.get()
    }

    /// Whether a target has been promoted.
    pub fn is_resolved(&self) -> bool {
        self.target.get().is_some()
    }
}
