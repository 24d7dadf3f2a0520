//! Pipeline run records and state machine vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::request::{ChangeRequest, FeatureKey};
use crate::gateway::{BranchName, ProposalRef};
use crate::stage::StageOutcome;

/// States a pipeline run moves through.
///
/// `Deployed`, `Rejected`, and `Aborted` are terminal; every other state
/// has exactly one successor on success and a terminal state on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Intake,
    RequirementExtraction,
    Design,
    SecurityGate,
    Implementation,
    AwaitingVerification,
    Merging,
    Deployed,
    Rejected,
    Aborted,
}

impl RunState {
    /// Whether this state is final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Deployed | RunState::Rejected | RunState::Aborted
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Intake => "intake",
            RunState::RequirementExtraction => "requirement_extraction",
            RunState::Design => "design",
            RunState::SecurityGate => "security_gate",
            RunState::Implementation => "implementation",
            RunState::AwaitingVerification => "awaiting_verification",
            RunState::Merging => "merging",
            RunState::Deployed => "deployed",
            RunState::Rejected => "rejected",
            RunState::Aborted => "aborted",
        };
        write!(f, "{name}")
    }
}

/// Terminal disposition of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Pending,
    Merged,
    Rejected,
    Aborted,
}

/// One execution of the pipeline for a change request.
///
/// Owned exclusively by the pipeline state machine. The outcome log is
/// append-only: entries are never mutated after being recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique identifier for this run.
    pub run_id: Uuid,

    /// Feature key this run holds the single-flight lock for.
    pub feature_key: FeatureKey,

    /// The accepted request (immutable).
    pub request: ChangeRequest,

    /// Current state.
    pub state: RunState,

    /// Terminal disposition (`Pending` until the run finishes).
    pub disposition: Disposition,

    /// Ordered log of stage outcomes.
    pub outcomes: Vec<StageOutcome>,

    /// Branch created for this run, once it exists.
    pub branch: Option<BranchName>,

    /// Change proposal opened for this run, once it exists.
    pub proposal: Option<ProposalRef>,

    /// Why the run reached its terminal state (rejection or abort reason).
    pub reason: Option<String>,

    /// When the run was accepted.
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Create a run in `Intake` for an accepted request.
    pub fn new(request: ChangeRequest) -> Self {
        let feature_key = request.feature_key();
        Self {
            run_id: Uuid::new_v4(),
            feature_key,
            request,
            state: RunState::Intake,
            disposition: Disposition::Pending,
            outcomes: Vec::new(),
            branch: None,
            proposal: None,
            reason: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Snapshot of this run for status queries.
    pub fn status(&self) -> RunStatus {
        RunStatus {
            run_id: self.run_id,
            feature_key: self.feature_key.clone(),
            state: self.state,
            disposition: self.disposition,
            outcomes: self.outcomes.clone(),
            branch: self.branch.clone(),
            proposal: self.proposal.clone(),
            reason: self.reason.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Point-in-time view of a run, returned by status queries.
///
/// For a terminal run this snapshot is stable: repeated queries return
/// identical results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: Uuid,
    pub feature_key: FeatureKey,
    pub state: RunState,
    pub disposition: Disposition,
    pub outcomes: Vec<StageOutcome>,
    pub branch: Option<BranchName>,
    pub proposal: Option<ProposalRef>,
    pub reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
