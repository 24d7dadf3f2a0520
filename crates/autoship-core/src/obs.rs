//! Structured observability hooks for pipeline run lifecycle events.
//!
//! Events are emitted at `info!` level; set `RUST_LOG` to filter and use
//! [`crate::telemetry::init_tracing`] with `json = true` for log
//! aggregation pipelines.

use tracing::{info, warn};

/// Emit event: run accepted and registered.
pub fn emit_run_submitted(run_id: &str, feature_key: &str, title: &str) {
    info!(event = "run.submitted", run_id = %run_id, feature = %feature_key, title = %title);
}

/// Emit event: stage invocation started.
pub fn emit_stage_started(run_id: &str, stage: &str) {
    info!(event = "stage.started", run_id = %run_id, stage = %stage);
}

/// Emit event: stage outcome recorded.
pub fn emit_stage_finished(run_id: &str, stage: &str, kind: &str) {
    info!(event = "stage.finished", run_id = %run_id, stage = %stage, outcome = %kind);
}

/// Emit event: verification wait finished.
pub fn emit_verification_done(run_id: &str, state: &str, polls: u32) {
    info!(event = "verification.done", run_id = %run_id, state = %state, polls = polls);
}

/// Emit event: compensating cleanup applied for an aborted run.
pub fn emit_compensation(run_id: &str, resource: &str, name: &str) {
    info!(event = "run.compensated", run_id = %run_id, resource = %resource, name = %name);
}

/// Emit event: deploy trigger dispatched (fire-and-forget).
pub fn emit_deploy_requested(run_id: &str, revision: &str) {
    info!(event = "deploy.requested", run_id = %run_id, revision = %revision);
}

/// Emit event: run reached a terminal state.
pub fn emit_run_terminal(run_id: &str, state: &str, reason: Option<&str>) {
    info!(
        event = "run.terminal",
        run_id = %run_id,
        state = %state,
        reason = reason.unwrap_or(""),
    );
}

/// Emit event: a compensating action itself failed (warning level).
pub fn emit_compensation_error(run_id: &str, resource: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.compensation_error", run_id = %run_id, resource = %resource, error = %error);
}
