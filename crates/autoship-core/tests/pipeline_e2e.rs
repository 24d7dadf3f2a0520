//! End-to-end pipeline tests against the in-memory gateway and scripted
//! stage capabilities.

use std::sync::Arc;
use std::time::Duration;

use autoship_core::fakes::{GatewayCall, MemoryGateway, ScriptedStages};
use autoship_core::{
    ChangeRequest, Disposition, GatewayError, Pipeline, PipelineConfig, PipelineError,
    PollerConfig, RetryPolicy, RunState, StageKind, StageOutcome, VerificationState,
};

fn fast_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_stage_timeout(Duration::from_secs(2))
        .with_poller(PollerConfig {
            interval: Duration::from_millis(5),
            deadline: Duration::from_millis(500),
        })
        .with_retry(RetryPolicy::none())
}

fn build(gateway: &Arc<MemoryGateway>, stages: ScriptedStages) -> Arc<Pipeline> {
    Pipeline::new(
        Arc::clone(gateway) as Arc<dyn autoship_core::HostGateway>,
        Arc::clone(gateway) as Arc<dyn autoship_core::DeployTrigger>,
        Arc::new(stages),
        fast_config(),
    )
}

fn request() -> ChangeRequest {
    ChangeRequest::new("add stats chart", "plot points per game on the player page")
}

/// Happy path: no design needed, security passes, implementation
/// succeeds, verification passes after two polls.
#[tokio::test]
async fn test_happy_path_deploys() {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.script_verification(vec![VerificationState::Running, VerificationState::Passed]);
    let pipeline = build(&gateway, ScriptedStages::happy_path());

    let handle = pipeline.submit(request()).expect("submit");
    let run_id = handle.run_id;
    let disposition = handle.wait().await.expect("wait");

    assert_eq!(disposition, Disposition::Merged);
    let status = pipeline.status(run_id).expect("status");
    assert_eq!(status.state, RunState::Deployed);
    assert_eq!(status.outcomes.len(), 4, "extraction, security, implementation, verification");
    assert!(status.reason.is_none());
    assert!(status.finished_at.is_some());

    let ops = gateway.mutating_ops();
    assert!(
        ops.starts_with(&["create_branch", "commit", "open_proposal", "merge"]),
        "unexpected gateway op order: {ops:?}"
    );

    let proposal = status.proposal.expect("proposal recorded");
    assert!(gateway.proposal_merged(&proposal));

    // Deploy trigger is fire-and-forget; give the spawned task a moment.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(gateway
        .calls()
        .iter()
        .any(|c| matches!(c, GatewayCall::DeployRequested { .. })));
}

/// Same request but verification fails: rejected, no merge, and the
/// proposal stays open as evidence.
#[tokio::test]
async fn test_verification_failure_rejects_and_keeps_proposal_open() {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.script_verification(vec![VerificationState::Running, VerificationState::Failed]);
    let pipeline = build(&gateway, ScriptedStages::happy_path());

    let handle = pipeline.submit(request()).expect("submit");
    let run_id = handle.run_id;
    assert_eq!(handle.wait().await.expect("wait"), Disposition::Rejected);

    let status = pipeline.status(run_id).expect("status");
    assert_eq!(status.state, RunState::Rejected);
    assert!(status.reason.as_deref().unwrap().contains("failed"));

    let ops = gateway.mutating_ops();
    assert!(!ops.contains(&"merge"), "no merge call expected: {ops:?}");
    assert!(!ops.contains(&"close_proposal"), "proposal must stay open");
    assert!(gateway.proposal_open(&status.proposal.expect("proposal")));
}

#[tokio::test]
async fn test_verification_errored_rejects() {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.script_verification(vec![VerificationState::Errored]);
    let pipeline = build(&gateway, ScriptedStages::happy_path());

    let handle = pipeline.submit(request()).expect("submit");
    let run_id = handle.run_id;
    assert_eq!(handle.wait().await.expect("wait"), Disposition::Rejected);
    assert!(!gateway.mutating_ops().contains(&"merge"));
    assert_eq!(pipeline.status(run_id).unwrap().state, RunState::Rejected);
}

/// Verification that never reaches a terminal state times out and is
/// routed through the rejection path, never treated as success.
#[tokio::test]
async fn test_verification_timeout_rejects_with_reason() {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.script_verification(vec![VerificationState::Pending]);
    let pipeline = build(&gateway, ScriptedStages::happy_path());

    let handle = pipeline.submit(request()).expect("submit");
    let run_id = handle.run_id;
    assert_eq!(handle.wait().await.expect("wait"), Disposition::Rejected);

    let status = pipeline.status(run_id).expect("status");
    assert_eq!(status.state, RunState::Rejected);
    assert_eq!(status.reason.as_deref(), Some("timeout"));
    assert!(!gateway.mutating_ops().contains(&"merge"));
}

/// A run failing the security gate never creates a branch or proposal,
/// and therefore never produces a merge call.
#[tokio::test]
async fn test_security_gate_failure_rejects_before_any_side_effect() {
    let gateway = Arc::new(MemoryGateway::new());
    let stages = ScriptedStages::happy_path().with_outcome(StageOutcome::failure(
        StageKind::SecurityGate,
        "changeset would expose credentials",
    ));
    let pipeline = build(&gateway, stages);

    let handle = pipeline.submit(request()).expect("submit");
    let run_id = handle.run_id;
    assert_eq!(handle.wait().await.expect("wait"), Disposition::Rejected);

    let status = pipeline.status(run_id).expect("status");
    assert_eq!(status.state, RunState::Rejected);
    assert_eq!(status.outcomes.len(), 2);
    assert!(status.reason.as_deref().unwrap().contains("credentials"));
    assert!(gateway.calls().is_empty(), "no gateway calls at all");
}

#[tokio::test]
async fn test_extraction_failure_aborts_without_side_effects() {
    let gateway = Arc::new(MemoryGateway::new());
    let stages = ScriptedStages::happy_path().with_outcome(StageOutcome::failure(
        StageKind::RequirementExtraction,
        "request is not actionable",
    ));
    let pipeline = build(&gateway, stages);

    let handle = pipeline.submit(request()).expect("submit");
    let run_id = handle.run_id;
    assert_eq!(handle.wait().await.expect("wait"), Disposition::Aborted);
    assert_eq!(pipeline.status(run_id).unwrap().state, RunState::Aborted);
    assert!(gateway.calls().is_empty());
}

/// Capability infrastructure failure becomes a failure outcome and
/// aborts like any other stage failure.
#[tokio::test]
async fn test_capability_error_aborts() {
    let gateway = Arc::new(MemoryGateway::new());
    let stages = ScriptedStages::happy_path()
        .with_capability_error(StageKind::Implementation, "agent endpoint down");
    let pipeline = build(&gateway, stages);

    let handle = pipeline.submit(request()).expect("submit");
    let run_id = handle.run_id;
    assert_eq!(handle.wait().await.expect("wait"), Disposition::Aborted);

    let status = pipeline.status(run_id).expect("status");
    assert!(status.reason.as_deref().unwrap().contains("unreachable"));
}

/// Commit failure after the branch exists: the branch is cleaned up, and
/// no proposal compensation happens because none was created.
#[tokio::test]
async fn test_commit_conflict_compensates_branch_only() {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.fail_op(
        "commit",
        GatewayError::CommitConflict {
            branch: "autoship/x".to_string(),
            detail: "non-fast-forward".to_string(),
        },
    );
    let pipeline = build(&gateway, ScriptedStages::happy_path());

    let handle = pipeline.submit(request()).expect("submit");
    let run_id = handle.run_id;
    assert_eq!(handle.wait().await.expect("wait"), Disposition::Aborted);

    let ops = gateway.mutating_ops();
    assert_eq!(ops, vec!["create_branch", "commit", "delete_branch"]);

    let status = pipeline.status(run_id).expect("status");
    let branch = status.branch.expect("branch recorded");
    assert!(!gateway.branch_exists(&branch.0), "branch cleaned up");
}

/// Merge failure after passed verification aborts with full compensation.
#[tokio::test]
async fn test_unmergeable_proposal_aborts_with_compensation() {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.script_verification(vec![VerificationState::Passed]);
    gateway.fail_op("merge", GatewayError::NotMergeable("base moved".to_string()));
    let pipeline = build(&gateway, ScriptedStages::happy_path());

    let handle = pipeline.submit(request()).expect("submit");
    let run_id = handle.run_id;
    assert_eq!(handle.wait().await.expect("wait"), Disposition::Aborted);

    let ops = gateway.mutating_ops();
    assert_eq!(
        ops,
        vec![
            "create_branch",
            "commit",
            "open_proposal",
            "merge",
            "close_proposal",
            "delete_branch",
        ]
    );

    let status = pipeline.status(run_id).expect("status");
    assert!(!gateway.proposal_open(&status.proposal.expect("proposal")));
}

/// Single flight: a second submit of the same request conflicts while
/// the first run is active, and succeeds again after it finishes.
#[tokio::test]
async fn test_duplicate_submit_conflicts_until_terminal() {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.script_verification(vec![VerificationState::Passed]);
    let stages = ScriptedStages::happy_path()
        .with_delay(StageKind::RequirementExtraction, Duration::from_millis(100));
    let pipeline = build(&gateway, stages);

    let first = pipeline.submit(request()).expect("first submit");
    let err = pipeline.submit(request()).unwrap_err();
    match err {
        PipelineError::DuplicateRun { run_id, .. } => assert_eq!(run_id, first.run_id),
        other => panic!("expected DuplicateRun, got {other:?}"),
    }

    assert_eq!(first.wait().await.expect("wait"), Disposition::Merged);

    // Terminal disposition released the feature-key lock.
    gateway.script_verification(vec![VerificationState::Passed]);
    let second = pipeline.submit(request()).expect("resubmit after terminal");
    second.cancel();
    let _ = second.wait().await;
}

/// Runs for distinct feature keys proceed concurrently and
/// independently.
#[tokio::test]
async fn test_distinct_features_run_concurrently() {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.script_verification(vec![VerificationState::Passed]);
    let pipeline = build(&gateway, ScriptedStages::happy_path());

    let a = pipeline.submit(request()).expect("submit a");
    let b = pipeline
        .submit(ChangeRequest::new("fix login", "reject empty passwords"))
        .expect("submit b");

    assert_eq!(a.wait().await.expect("a"), Disposition::Merged);
    // The second run races the first on the scripted verification states;
    // both scripts end in Passed so both runs merge.
    assert_eq!(b.wait().await.expect("b"), Disposition::Merged);
}

/// Cancelling before any resource exists aborts with no compensation.
#[tokio::test]
async fn test_cancel_during_stage_discards_and_aborts_cleanly() {
    let gateway = Arc::new(MemoryGateway::new());
    let stages = ScriptedStages::happy_path()
        .with_delay(StageKind::SecurityGate, Duration::from_millis(300));
    let pipeline = build(&gateway, stages);

    let handle = pipeline.submit(request()).expect("submit");
    let run_id = handle.run_id;
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();
    assert_eq!(handle.wait().await.expect("wait"), Disposition::Aborted);

    let status = pipeline.status(run_id).expect("status");
    assert_eq!(status.state, RunState::Aborted);
    assert_eq!(status.reason.as_deref(), Some("cancelled"));
    assert!(gateway.calls().is_empty(), "nothing created, nothing compensated");
}

/// Cancelling while awaiting verification compensates both the proposal
/// and the branch.
#[tokio::test]
async fn test_cancel_during_verification_compensates_created_resources() {
    let gateway = Arc::new(MemoryGateway::new());
    // Never terminal: the run parks in AwaitingVerification.
    gateway.script_verification(vec![VerificationState::Pending]);
    let pipeline = Pipeline::new(
        Arc::clone(&gateway) as Arc<dyn autoship_core::HostGateway>,
        Arc::clone(&gateway) as Arc<dyn autoship_core::DeployTrigger>,
        Arc::new(ScriptedStages::happy_path()),
        fast_config().with_poller(PollerConfig {
            interval: Duration::from_millis(10),
            deadline: Duration::from_secs(60),
        }),
    );

    let handle = pipeline.submit(request()).expect("submit");
    let run_id = handle.run_id;

    // Wait until the run has opened its proposal.
    for _ in 0..100 {
        if pipeline.status(run_id).unwrap().state == RunState::AwaitingVerification {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        pipeline.status(run_id).unwrap().state,
        RunState::AwaitingVerification
    );

    handle.cancel();
    assert_eq!(handle.wait().await.expect("wait"), Disposition::Aborted);

    let status = pipeline.status(run_id).expect("status");
    let ops = gateway.mutating_ops();
    assert!(ops.contains(&"close_proposal"), "proposal compensated: {ops:?}");
    assert!(ops.contains(&"delete_branch"), "branch compensated: {ops:?}");
    assert!(!gateway.proposal_open(&status.proposal.expect("proposal")));
    assert!(!gateway.branch_exists(&status.branch.expect("branch").0));
}

/// Conditional design stage: entered only when extraction flags it.
#[tokio::test]
async fn test_design_stage_runs_when_flagged() {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.script_verification(vec![VerificationState::Passed]);
    let pipeline = build(&gateway, ScriptedStages::happy_path().with_design_needed());

    let handle = pipeline.submit(request()).expect("submit");
    let run_id = handle.run_id;
    assert_eq!(handle.wait().await.expect("wait"), Disposition::Merged);

    let status = pipeline.status(run_id).expect("status");
    assert_eq!(status.outcomes.len(), 5);
    assert!(status
        .outcomes
        .iter()
        .any(|o| o.stage == StageKind::Design));
}

/// A panicking capability unwinds the run task; the feature key must be
/// released anyway so the feature is not locked for the process
/// lifetime.
#[tokio::test]
async fn test_panicking_capability_releases_feature_key() {
    struct ExplodingStages;

    #[async_trait::async_trait]
    impl autoship_core::StageCapability for ExplodingStages {
        async fn invoke(
            &self,
            _stage: StageKind,
            _context: &autoship_core::StageContext,
        ) -> Result<StageOutcome, autoship_core::CapabilityError> {
            panic!("capability crashed");
        }
    }

    let gateway = Arc::new(MemoryGateway::new());
    let pipeline = Pipeline::new(
        Arc::clone(&gateway) as Arc<dyn autoship_core::HostGateway>,
        Arc::clone(&gateway) as Arc<dyn autoship_core::DeployTrigger>,
        Arc::new(ExplodingStages),
        fast_config(),
    );

    let handle = pipeline.submit(request()).expect("submit");
    let feature_key = handle.feature_key.clone();
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, PipelineError::Internal(_)));

    assert!(
        pipeline.active_run(&feature_key).is_none(),
        "feature key must be released after a panicked run"
    );

    // The key is free again: the same request is accepted.
    let second = pipeline.submit(request()).expect("resubmit after panicked run");
    second.cancel();
    let _ = second.wait().await;
}

/// Status queries for a terminal run are idempotent.
#[tokio::test]
async fn test_terminal_status_is_idempotent() {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.script_verification(vec![VerificationState::Passed]);
    let pipeline = build(&gateway, ScriptedStages::happy_path());

    let handle = pipeline.submit(request()).expect("submit");
    let run_id = handle.run_id;
    let feature_key = handle.feature_key.clone();
    handle.wait().await.expect("wait");

    let first = pipeline.status(run_id).expect("status");
    let second = pipeline.status(run_id).expect("status again");
    assert_eq!(first, second);

    let by_key = pipeline.status_by_key(&feature_key).expect("by key");
    assert_eq!(by_key, first);
    assert!(pipeline.active_run(&feature_key).is_none());
}
