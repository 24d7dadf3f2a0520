//! Pipeline state machine.
//!
//! Owns one run per change request: sequences the stage capabilities,
//! applies branch/commit/proposal side effects between stages, delegates
//! the verification wait to the poller, and decides terminal disposition.
//! Merge decisions are made strictly from the externally observed
//! verification state.
//!
//! Concurrency model: each run is an independent spawned task; stages
//! within a run execute strictly sequentially. Runs share no mutable
//! state except the [`RunRegistry`], whose acquire/release is atomic. The
//! feature-key lock is held for the whole run, including the verification
//! wait, and released exactly once when the run task ends — whether it
//! reached a terminal disposition or unwound from a panic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::domain::error::{PipelineError, Result};
use crate::domain::request::{ChangeRequest, FeatureKey};
use crate::domain::run::{Disposition, PipelineRun, RunState, RunStatus};
use crate::gateway::{
    BranchName, DeployTrigger, GatewayError, HostGateway, RevisionRef, VerificationState,
};
use crate::obs;
use crate::poller::await_verification;
use crate::registry::RunRegistry;
use crate::retry::with_retry;
use crate::stage::{StageCapability, StageContext, StageKind, StageOutcome};

type SharedRun = Arc<Mutex<PipelineRun>>;

/// Handle to a submitted run.
///
/// Dropping the handle does not cancel the run; call [`RunHandle::cancel`]
/// for that. [`RunHandle::wait`] resolves once the run reaches a terminal
/// disposition.
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: Uuid,
    pub feature_key: FeatureKey,
    cancel: watch::Sender<bool>,
    task: JoinHandle<Disposition>,
}

impl RunHandle {
    /// Request cancellation. Safe to call at any time, including while a
    /// stage is in flight; a result arriving after cancellation is
    /// discarded, not applied.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Wait for the run to reach its terminal disposition.
    pub async fn wait(self) -> Result<Disposition> {
        self.task
            .await
            .map_err(|e| PipelineError::Internal(format!("run task failed: {e}")))
    }
}

/// The pipeline orchestrator.
pub struct Pipeline {
    gateway: Arc<dyn HostGateway>,
    deploy: Arc<dyn DeployTrigger>,
    capability: Arc<dyn StageCapability>,
    registry: RunRegistry,
    config: PipelineConfig,
    /// All runs ever submitted, terminal ones included, so status
    /// queries stay answerable for the process lifetime. Grows with
    /// submissions; a long-lived deployment needs an archival policy
    /// before this becomes a concern.
    runs: Mutex<HashMap<Uuid, SharedRun>>,
}

/// How one pipeline step resolved.
enum StepEnd {
    Advance(StageOutcome),
    Fail(String),
    Cancelled,
}

/// Releases a run's feature-key lock when the run task ends.
///
/// Lives on the `drive` stack, so the release also happens when the task
/// unwinds from a panicking capability or gateway. Without it a panic
/// would leave the feature locked for the process lifetime.
struct KeyReleaseGuard {
    pipeline: Arc<Pipeline>,
    feature_key: FeatureKey,
}

impl Drop for KeyReleaseGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!(event = "run.lock_reclaimed", feature = %self.feature_key);
        }
        self.pipeline.registry.release(&self.feature_key);
    }
}

impl Pipeline {
    pub fn new(
        gateway: Arc<dyn HostGateway>,
        deploy: Arc<dyn DeployTrigger>,
        capability: Arc<dyn StageCapability>,
        config: PipelineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            deploy,
            capability,
            registry: RunRegistry::new(),
            config,
            runs: Mutex::new(HashMap::new()),
        })
    }

    /// Accept a change request and begin a pipeline run for it.
    ///
    /// Fails with [`PipelineError::DuplicateRun`] when an active run
    /// already holds the derived feature key; in that case nothing is
    /// created or mutated.
    pub fn submit(self: &Arc<Self>, request: ChangeRequest) -> Result<RunHandle> {
        let run = PipelineRun::new(request);
        let run_id = run.run_id;
        let feature_key = run.feature_key.clone();

        self.registry.acquire(&feature_key, run_id)?;

        obs::emit_run_submitted(
            &run_id.to_string(),
            feature_key.as_str(),
            &run.request.title,
        );

        let shared: SharedRun = Arc::new(Mutex::new(run));
        self.runs.lock().unwrap().insert(run_id, Arc::clone(&shared));

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let task = tokio::spawn(this.drive(shared, cancel_rx));

        Ok(RunHandle {
            run_id,
            feature_key,
            cancel: cancel_tx,
            task,
        })
    }

    /// Status snapshot for a run. Idempotent for terminal runs.
    pub fn status(&self, run_id: Uuid) -> Result<RunStatus> {
        let runs = self.runs.lock().unwrap();
        runs.get(&run_id)
            .map(|r| r.lock().unwrap().status())
            .ok_or_else(|| PipelineError::RunNotFound(run_id.to_string()))
    }

    /// Status snapshot of the most recent run for a feature key.
    pub fn status_by_key(&self, key: &FeatureKey) -> Result<RunStatus> {
        let runs = self.runs.lock().unwrap();
        runs.values()
            .map(|r| r.lock().unwrap().status())
            .filter(|s| &s.feature_key == key)
            .max_by_key(|s| s.started_at)
            .ok_or_else(|| PipelineError::FeatureNotFound(key.as_str().to_string()))
    }

    /// Run id currently holding the single-flight lock for `key`.
    pub fn active_run(&self, key: &FeatureKey) -> Option<Uuid> {
        self.registry.active_run(key)
    }

    #[instrument(skip_all, fields(run_id = %run.lock().unwrap().run_id))]
    async fn drive(
        self: Arc<Self>,
        run: SharedRun,
        mut cancel: watch::Receiver<bool>,
    ) -> Disposition {
        let _release = KeyReleaseGuard {
            pipeline: Arc::clone(&self),
            feature_key: run.lock().unwrap().feature_key.clone(),
        };

        // Requirement extraction.
        self.set_state(&run, RunState::RequirementExtraction);
        let needs_design = match self
            .run_stage(&run, StageKind::RequirementExtraction, &mut cancel)
            .await
        {
            StepEnd::Advance(outcome) => outcome.needs_design(),
            StepEnd::Fail(reason) => return self.finish_aborted(&run, reason).await,
            StepEnd::Cancelled => return self.finish_cancelled(&run).await,
        };

        // Design, only when extraction flagged the request.
        if needs_design {
            self.set_state(&run, RunState::Design);
            match self.run_stage(&run, StageKind::Design, &mut cancel).await {
                StepEnd::Advance(_) => {}
                StepEnd::Fail(reason) => return self.finish_aborted(&run, reason).await,
                StepEnd::Cancelled => return self.finish_cancelled(&run).await,
            }
        }

        // Security gate. A non-success outcome is a policy rejection: the
        // run terminates before any branch or proposal can exist, so no
        // revision that failed the gate ever reaches verification.
        self.set_state(&run, RunState::SecurityGate);
        match self
            .run_stage(&run, StageKind::SecurityGate, &mut cancel)
            .await
        {
            StepEnd::Advance(_) => {}
            StepEnd::Fail(reason) => return self.finish_rejected(&run, reason).await,
            StepEnd::Cancelled => return self.finish_cancelled(&run).await,
        }

        // Implementation.
        self.set_state(&run, RunState::Implementation);
        let changeset = match self
            .run_stage(&run, StageKind::Implementation, &mut cancel)
            .await
        {
            StepEnd::Advance(outcome) => match outcome.changeset() {
                Some(changeset) => changeset,
                None => {
                    return self
                        .finish_aborted(&run, "implementation produced no changeset".to_string())
                        .await
                }
            },
            StepEnd::Fail(reason) => return self.finish_aborted(&run, reason).await,
            StepEnd::Cancelled => return self.finish_cancelled(&run).await,
        };

        // Branch, commit, proposal.
        let (request, feature_key) = {
            let guard = run.lock().unwrap();
            (guard.request.clone(), guard.feature_key.clone())
        };
        let branch = BranchName(feature_key.branch_name());

        if let Err(e) = with_retry(&self.config.retry, "create_branch", || {
            self.gateway.create_branch(&branch, &self.config.base_branch)
        })
        .await
        {
            return self.finish_aborted(&run, format!("create branch: {e}")).await;
        }
        run.lock().unwrap().branch = Some(branch.clone());

        let message = format!("{} ({})", changeset.summary, feature_key);
        let revision = match with_retry(&self.config.retry, "commit", || {
            self.gateway.commit(&branch, &changeset, &message)
        })
        .await
        {
            Ok(revision) => revision,
            Err(e) => return self.finish_aborted(&run, format!("commit: {e}")).await,
        };

        let body = format!(
            "{}\n\npriority: {}\nfeature: {}",
            request.description, request.priority, feature_key
        );
        let proposal = match with_retry(&self.config.retry, "open_proposal", || {
            self.gateway
                .open_proposal(&branch, &self.config.base_branch, &request.title, &body)
        })
        .await
        {
            Ok(proposal) => proposal,
            Err(e) => return self.finish_aborted(&run, format!("open proposal: {e}")).await,
        };
        run.lock().unwrap().proposal = Some(proposal.clone());

        // Verification: observed, never synthesized. The feature-key lock
        // stays held while waiting, so no second run can race this one.
        self.set_state(&run, RunState::AwaitingVerification);
        let report = tokio::select! {
            _ = wait_cancelled(&mut cancel) => return self.finish_cancelled(&run).await,
            result = await_verification(
                self.gateway.as_ref(),
                &proposal,
                &self.config.poller,
                &self.config.retry,
            ) => match result {
                Ok(report) => report,
                Err(e) => return self.finish_aborted(&run, format!("verification: {e}")).await,
            },
        };

        let run_id_str = run.lock().unwrap().run_id.to_string();
        obs::emit_verification_done(&run_id_str, &report.state.to_string(), report.polls);

        // Record the observed verification result in the audit log.
        let verification_outcome = match report.state {
            VerificationState::Passed => StageOutcome::success(
                StageKind::Verification,
                serde_json::json!({"state": report.state, "polls": report.polls}),
            ),
            state => StageOutcome::failure(
                StageKind::Verification,
                report
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("verification {state}")),
            ),
        };
        run.lock().unwrap().outcomes.push(verification_outcome);

        match report.state {
            VerificationState::Passed => {
                self.set_state(&run, RunState::Merging);
                match with_retry(&self.config.retry, "merge", || self.gateway.merge(&proposal))
                    .await
                {
                    Ok(()) | Err(GatewayError::AlreadyMerged(_)) => {}
                    Err(e) => return self.finish_aborted(&run, format!("merge: {e}")).await,
                }
                self.trigger_deploy(&run_id_str, revision);
                self.finish_deployed(&run).await
            }
            // Failed and errored (including poller timeout) both reject.
            // The proposal is left open with its failure status so the
            // evidence stays inspectable.
            state => {
                let reason = report
                    .reason
                    .unwrap_or_else(|| format!("verification {state}"));
                self.finish_rejected(&run, reason).await
            }
        }
    }

    /// Invoke one stage capability with timeout and cancellation.
    ///
    /// Capability infrastructure errors and timeouts become failure
    /// outcomes; they are recorded in the run log like any other outcome.
    async fn run_stage(
        &self,
        run: &SharedRun,
        stage: StageKind,
        cancel: &mut watch::Receiver<bool>,
    ) -> StepEnd {
        let (run_id, context) = {
            let guard = run.lock().unwrap();
            (
                guard.run_id.to_string(),
                StageContext {
                    feature_key: guard.feature_key.clone(),
                    request: guard.request.clone(),
                    prior_outcomes: guard.outcomes.clone(),
                },
            )
        };

        obs::emit_stage_started(&run_id, stage.name());

        let outcome = tokio::select! {
            _ = wait_cancelled(cancel) => return StepEnd::Cancelled,
            result = tokio::time::timeout(
                self.config.stage_timeout,
                self.capability.invoke(stage, &context),
            ) => match result {
                Err(_) => StageOutcome::failure(stage, "stage timed out"),
                Ok(Err(e)) => StageOutcome::failure(stage, e.to_string()),
                Ok(Ok(outcome)) => outcome,
            },
        };

        // A result that raced a cancellation is discarded, not applied.
        if *cancel.borrow() {
            debug!(event = "stage.discarded", run_id = %run_id, stage = %stage);
            return StepEnd::Cancelled;
        }

        obs::emit_stage_finished(&run_id, stage.name(), &format!("{:?}", outcome.kind));
        run.lock().unwrap().outcomes.push(outcome.clone());

        if outcome.is_success() {
            StepEnd::Advance(outcome)
        } else {
            StepEnd::Fail(outcome.reason_or_default())
        }
    }

    fn set_state(&self, run: &SharedRun, state: RunState) {
        let mut guard = run.lock().unwrap();
        debug!(event = "run.state", run_id = %guard.run_id, from = %guard.state, to = %state);
        guard.state = state;
    }

    /// Fire-and-forget deploy trigger. The outcome notification is logged
    /// whenever it arrives; run state never depends on it.
    fn trigger_deploy(&self, run_id: &str, revision: RevisionRef) {
        obs::emit_deploy_requested(run_id, &revision.0);
        let deploy = Arc::clone(&self.deploy);
        let run_id = run_id.to_string();
        tokio::spawn(async move {
            match deploy.request_deploy(&revision).await {
                Ok(()) => info!(event = "deploy.acknowledged", run_id = %run_id, revision = %revision),
                Err(e) => warn!(event = "deploy.failed", run_id = %run_id, revision = %revision, error = %e),
            }
        });
    }

    /// Compensating cleanup: close the proposal and delete the branch,
    /// but only for resources this run actually created.
    async fn compensate(&self, run: &SharedRun) {
        let (run_id, branch, proposal) = {
            let guard = run.lock().unwrap();
            (
                guard.run_id.to_string(),
                guard.branch.clone(),
                guard.proposal.clone(),
            )
        };

        if let Some(proposal) = proposal {
            match with_retry(&self.config.retry, "close_proposal", || {
                self.gateway.close_proposal(&proposal)
            })
            .await
            {
                Ok(()) => obs::emit_compensation(&run_id, "proposal", &proposal.0),
                Err(e) => obs::emit_compensation_error(&run_id, "proposal", &e),
            }
        }
        if let Some(branch) = branch {
            match with_retry(&self.config.retry, "delete_branch", || {
                self.gateway.delete_branch(&branch)
            })
            .await
            {
                Ok(()) => obs::emit_compensation(&run_id, "branch", &branch.0),
                Err(e) => obs::emit_compensation_error(&run_id, "branch", &e),
            }
        }
    }

    async fn finish_aborted(&self, run: &SharedRun, reason: String) -> Disposition {
        self.compensate(run).await;
        self.terminalize(run, RunState::Aborted, Disposition::Aborted, Some(reason))
    }

    async fn finish_cancelled(&self, run: &SharedRun) -> Disposition {
        self.compensate(run).await;
        self.terminalize(
            run,
            RunState::Aborted,
            Disposition::Aborted,
            Some("cancelled".to_string()),
        )
    }

    async fn finish_rejected(&self, run: &SharedRun, reason: String) -> Disposition {
        // No cleanup: rejection is visible, not silently erased.
        self.terminalize(run, RunState::Rejected, Disposition::Rejected, Some(reason))
    }

    async fn finish_deployed(&self, run: &SharedRun) -> Disposition {
        self.terminalize(run, RunState::Deployed, Disposition::Merged, None)
    }

    /// Enter a terminal state. The feature-key lock is released by the
    /// run task's [`KeyReleaseGuard`] when `drive` returns, allowing a
    /// new run for the same feature thereafter.
    fn terminalize(
        &self,
        run: &SharedRun,
        state: RunState,
        disposition: Disposition,
        reason: Option<String>,
    ) -> Disposition {
        let mut guard = run.lock().unwrap();
        guard.state = state;
        guard.disposition = disposition;
        guard.reason = reason.clone();
        guard.finished_at = Some(chrono::Utc::now());
        obs::emit_run_terminal(
            &guard.run_id.to_string(),
            &state.to_string(),
            reason.as_deref(),
        );
        disposition
    }
}

/// Resolve when cancellation is requested; never resolve if the handle
/// (and its sender) has been dropped without cancelling.
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}
