//! Lifecycle states, step kinds, absorbed no-ops and status snapshots

use crate::{OwnerName, Token};
use serde::{Deserialize, Serialize};

/// Lifecycle of a procedure, derived from its `(has_started, done)` flags
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcedureState {
    /// Never begun, or reset
    Idle,
    /// Begun and waiting on a step
    Running,
    /// Queue drained; needs `reset` before it can run again
    Complete,
}

impl ProcedureState {
    pub fn from_flags(has_started: bool, done: bool) -> Self {
        match (has_started, done) {
            (_, true) => ProcedureState::Complete,
            (true, false) => ProcedureState::Running,
            (false, false) => ProcedureState::Idle,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcedureState::Complete)
    }
}

impl std::fmt::Display for ProcedureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcedureState::Idle => write!(f, "idle"),
            ProcedureState::Running => write!(f, "running"),
            ProcedureState::Complete => write!(f, "complete"),
        }
    }
}

/// How a step delegates its work
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Completes itself through the registry as soon as it begins
    Marker,
    /// Fires a one-way command at a component and waits for a signal
    Dispatch,
    /// Begins a nested procedure
    Delegate,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::Marker => write!(f, "marker"),
            StepKind::Dispatch => write!(f, "dispatch"),
            StepKind::Delegate => write!(f, "delegate"),
        }
    }
}

/// A call that was absorbed as a no-op rather than failing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftRejection {
    /// `begin` while already running
    AlreadyRunning,
    /// `begin` or `handle` after completion
    AlreadyDone,
    /// `handle` with an empty token
    EmptyToken,
    /// `handle` whose token is not the current step's id
    MismatchedToken,
    /// `handle` on an orchestrator that was never begun
    NotStarted,
}

impl std::fmt::Display for SoftRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SoftRejection::AlreadyRunning => "already running",
            SoftRejection::AlreadyDone => "already done",
            SoftRejection::EmptyToken => "empty token",
            SoftRejection::MismatchedToken => "mismatched token",
            SoftRejection::NotStarted => "not started",
        };
        write!(f, "{}", text)
    }
}

/// Snapshot of one configured step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    pub id: Token,
    pub kind: StepKind,
    pub has_started: bool,
    pub done: bool,
}

/// Snapshot of an orchestrator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureStatus {
    pub name: OwnerName,
    pub state: ProcedureState,
    /// Step currently awaiting completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<Token>,
    /// Steps still queued behind `current`, in order
    pub pending: Vec<Token>,
    pub completed_runs: u64,
    pub steps: Vec<StepStatus>,
}

impl ProcedureStatus {
    pub fn is_complete(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn done_count(&self) -> usize {
        self.steps.iter().filter(|s| s.done).count()
    }
}
