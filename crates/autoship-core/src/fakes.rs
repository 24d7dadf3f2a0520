//! In-memory fakes for the gateway and stage capabilities (testing only).
//!
//! `MemoryGateway` satisfies the [`HostGateway`] and [`DeployTrigger`]
//! contracts without any external system and records every call, so tests
//! can assert on exactly which side effects a run produced.
//! `ScriptedStages` is a [`StageCapability`] returning pre-arranged
//! outcomes per stage.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::gateway::{
    BranchName, Changeset, DeployTrigger, FileChange, GatewayError, GatewayResult, HostGateway,
    ProposalRef, RevisionRef, VerificationState,
};
use crate::stage::{CapabilityError, StageCapability, StageContext, StageKind, StageOutcome};

/// One recorded gateway call.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    CreateBranch { name: String, from_ref: String },
    Commit { branch: String, message: String },
    OpenProposal { branch: String, base: String, title: String },
    VerificationQuery { proposal: String },
    Merge { proposal: String },
    CloseProposal { proposal: String },
    DeleteBranch { name: String },
    DeployRequested { revision: String },
}

impl GatewayCall {
    /// Operation name, for order assertions.
    pub fn op(&self) -> &'static str {
        match self {
            GatewayCall::CreateBranch { .. } => "create_branch",
            GatewayCall::Commit { .. } => "commit",
            GatewayCall::OpenProposal { .. } => "open_proposal",
            GatewayCall::VerificationQuery { .. } => "verification_state",
            GatewayCall::Merge { .. } => "merge",
            GatewayCall::CloseProposal { .. } => "close_proposal",
            GatewayCall::DeleteBranch { .. } => "delete_branch",
            GatewayCall::DeployRequested { .. } => "deploy",
        }
    }
}

#[derive(Debug, Clone)]
struct ProposalState {
    branch: String,
    open: bool,
    merged: bool,
}

/// In-memory version-control host with a call log.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    calls: Mutex<Vec<GatewayCall>>,
    branches: Mutex<HashSet<String>>,
    proposals: Mutex<HashMap<String, ProposalState>>,
    verification_script: Mutex<VecDeque<VerificationState>>,
    failures: Mutex<HashMap<&'static str, GatewayError>>,
    counter: AtomicU64,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the sequence of verification states returned by successive
    /// queries. The last state repeats once the script is exhausted.
    pub fn script_verification(&self, states: Vec<VerificationState>) {
        let mut script = self.verification_script.lock().unwrap();
        *script = states.into();
    }

    /// Make every future call to `op` fail with `error`.
    pub fn fail_op(&self, op: &'static str, error: GatewayError) {
        self.failures.lock().unwrap().insert(op, error);
    }

    /// Everything the gateway was asked to do, in order.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Operation names of all mutating calls, in order. Excludes the
    /// idempotent verification queries.
    pub fn mutating_ops(&self) -> Vec<&'static str> {
        self.calls()
            .iter()
            .map(GatewayCall::op)
            .filter(|op| *op != "verification_state")
            .collect()
    }

    /// Whether a branch currently exists.
    pub fn branch_exists(&self, name: &str) -> bool {
        self.branches.lock().unwrap().contains(name)
    }

    /// Whether a proposal is still open.
    pub fn proposal_open(&self, proposal: &ProposalRef) -> bool {
        self.proposals
            .lock()
            .unwrap()
            .get(&proposal.0)
            .map(|p| p.open)
            .unwrap_or(false)
    }

    /// Whether a proposal has been merged.
    pub fn proposal_merged(&self, proposal: &ProposalRef) -> bool {
        self.proposals
            .lock()
            .unwrap()
            .get(&proposal.0)
            .map(|p| p.merged)
            .unwrap_or(false)
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn injected_failure(&self, op: &'static str) -> Option<GatewayError> {
        self.failures.lock().unwrap().get(op).cloned()
    }

    fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl HostGateway for MemoryGateway {
    async fn create_branch(&self, name: &BranchName, from_ref: &str) -> GatewayResult<()> {
        self.record(GatewayCall::CreateBranch {
            name: name.0.clone(),
            from_ref: from_ref.to_string(),
        });
        if let Some(err) = self.injected_failure("create_branch") {
            return Err(err);
        }
        let mut branches = self.branches.lock().unwrap();
        if !branches.insert(name.0.clone()) {
            return Err(GatewayError::BranchExists(name.0.clone()));
        }
        Ok(())
    }

    async fn commit(
        &self,
        branch: &BranchName,
        _changeset: &Changeset,
        message: &str,
    ) -> GatewayResult<RevisionRef> {
        self.record(GatewayCall::Commit {
            branch: branch.0.clone(),
            message: message.to_string(),
        });
        if let Some(err) = self.injected_failure("commit") {
            return Err(err);
        }
        if !self.branches.lock().unwrap().contains(&branch.0) {
            return Err(GatewayError::RefNotFound(branch.0.clone()));
        }
        Ok(RevisionRef(format!("rev-{}", self.next_id())))
    }

    async fn open_proposal(
        &self,
        branch: &BranchName,
        base: &str,
        title: &str,
        _body: &str,
    ) -> GatewayResult<ProposalRef> {
        self.record(GatewayCall::OpenProposal {
            branch: branch.0.clone(),
            base: base.to_string(),
            title: title.to_string(),
        });
        if let Some(err) = self.injected_failure("open_proposal") {
            return Err(err);
        }
        let id = format!("cp-{}", self.next_id());
        self.proposals.lock().unwrap().insert(
            id.clone(),
            ProposalState {
                branch: branch.0.clone(),
                open: true,
                merged: false,
            },
        );
        Ok(ProposalRef(id))
    }

    async fn verification_state(
        &self,
        proposal: &ProposalRef,
    ) -> GatewayResult<VerificationState> {
        self.record(GatewayCall::VerificationQuery {
            proposal: proposal.0.clone(),
        });
        if let Some(err) = self.injected_failure("verification_state") {
            return Err(err);
        }
        let mut script = self.verification_script.lock().unwrap();
        let state = if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().copied().unwrap_or(VerificationState::Pending)
        };
        Ok(state)
    }

    async fn merge(&self, proposal: &ProposalRef) -> GatewayResult<()> {
        self.record(GatewayCall::Merge {
            proposal: proposal.0.clone(),
        });
        if let Some(err) = self.injected_failure("merge") {
            return Err(err);
        }
        let mut proposals = self.proposals.lock().unwrap();
        let state = proposals
            .get_mut(&proposal.0)
            .ok_or_else(|| GatewayError::ProposalNotFound(proposal.0.clone()))?;
        if state.merged {
            return Err(GatewayError::AlreadyMerged(proposal.0.clone()));
        }
        if !state.open {
            return Err(GatewayError::NotMergeable(proposal.0.clone()));
        }
        state.merged = true;
        state.open = false;
        Ok(())
    }

    async fn close_proposal(&self, proposal: &ProposalRef) -> GatewayResult<()> {
        self.record(GatewayCall::CloseProposal {
            proposal: proposal.0.clone(),
        });
        if let Some(err) = self.injected_failure("close_proposal") {
            return Err(err);
        }
        let mut proposals = self.proposals.lock().unwrap();
        if let Some(state) = proposals.get_mut(&proposal.0) {
            state.open = false;
        }
        Ok(())
    }

    async fn delete_branch(&self, name: &BranchName) -> GatewayResult<()> {
        self.record(GatewayCall::DeleteBranch {
            name: name.0.clone(),
        });
        if let Some(err) = self.injected_failure("delete_branch") {
            return Err(err);
        }
        self.branches.lock().unwrap().remove(&name.0);
        Ok(())
    }
}

#[async_trait]
impl DeployTrigger for MemoryGateway {
    async fn request_deploy(&self, revision: &RevisionRef) -> GatewayResult<()> {
        self.record(GatewayCall::DeployRequested {
            revision: revision.0.clone(),
        });
        if let Some(err) = self.injected_failure("deploy") {
            return Err(err);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ScriptedEntry {
    outcome: StageOutcome,
    delay: Duration,
    error: Option<String>,
}

/// Capability returning pre-arranged outcomes per stage.
#[derive(Debug, Default)]
pub struct ScriptedStages {
    entries: Mutex<HashMap<StageKind, ScriptedEntry>>,
}

impl ScriptedStages {
    /// All four stages succeed: no design needed, security clean, and the
    /// implementation produces a one-file changeset.
    pub fn happy_path() -> Self {
        let stages = Self::default();
        stages.set_outcome(StageOutcome::success(
            StageKind::RequirementExtraction,
            json!({"requirements": ["plot points per game"], "needs_design": false}),
        ));
        stages.set_outcome(StageOutcome::success(
            StageKind::Design,
            json!({"design_doc": "single line chart, one series per player"}),
        ));
        stages.set_outcome(StageOutcome::success(
            StageKind::SecurityGate,
            json!({"verdict": "clean", "findings": []}),
        ));
        stages.set_outcome(StageOutcome::success(
            StageKind::Implementation,
            json!({
                "changeset": {
                    "summary": "add stats chart",
                    "files": [{"path": "web/chart.js", "content": "renderChart();"}],
                }
            }),
        ));
        stages
    }

    /// Replace the scripted outcome for `outcome.stage`.
    pub fn set_outcome(&self, outcome: StageOutcome) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            outcome.stage,
            ScriptedEntry {
                outcome,
                delay: Duration::ZERO,
                error: None,
            },
        );
    }

    /// Same as [`set_outcome`](Self::set_outcome), builder-style.
    pub fn with_outcome(self, outcome: StageOutcome) -> Self {
        self.set_outcome(outcome);
        self
    }

    /// Mark the extraction outcome as requiring a design stage.
    pub fn with_design_needed(self) -> Self {
        self.set_outcome(StageOutcome::success(
            StageKind::RequirementExtraction,
            json!({"requirements": ["plot points per game"], "needs_design": true}),
        ));
        self
    }

    /// Delay a stage's answer, for cancellation and timeout tests.
    pub fn with_delay(self, stage: StageKind, delay: Duration) -> Self {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&stage) {
            entry.delay = delay;
        }
        drop(entries);
        self
    }

    /// Make a stage fail with a capability (infrastructure) error.
    pub fn with_capability_error(self, stage: StageKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&stage) {
            entry.error = Some(message);
        }
        drop(entries);
        self
    }
}

#[async_trait]
impl StageCapability for ScriptedStages {
    async fn invoke(
        &self,
        stage: StageKind,
        _context: &StageContext,
    ) -> std::result::Result<StageOutcome, CapabilityError> {
        let entry = {
            let entries = self.entries.lock().unwrap();
            entries.get(&stage).cloned()
        };
        let entry = entry.ok_or_else(|| {
            CapabilityError::InvalidOutcome(format!("no scripted outcome for stage {stage}"))
        })?;

        if !entry.delay.is_zero() {
            tokio::time::sleep(entry.delay).await;
        }
        if let Some(message) = entry.error {
            return Err(CapabilityError::Unreachable(message));
        }
        Ok(entry.outcome)
    }
}

/// Default changeset used by [`ScriptedStages::happy_path`]. Handy for
/// direct gateway tests.
pub fn sample_changeset() -> Changeset {
    Changeset {
        summary: "add stats chart".to_string(),
        files: vec![FileChange {
            path: "web/chart.js".to_string(),
            content: "renderChart();".to_string(),
        }],
    }
}
