//! Verification poller.
//!
//! Repeatedly queries the gateway for a proposal's aggregate verification
//! state until it reaches a terminal value or the deadline elapses. Every
//! wait is bounded; a deadline overrun is reported as `Errored` with
//! reason `"timeout"`, never silently treated as success.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::gateway::{GatewayResult, HostGateway, ProposalRef, VerificationState};
use crate::retry::{with_retry, RetryPolicy};

/// Poll interval and overall deadline for one verification wait.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Delay between consecutive state queries.
    pub interval: Duration,
    /// Overall budget for reaching a terminal state.
    pub deadline: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            deadline: Duration::from_secs(15 * 60),
        }
    }
}

/// Terminal result of a verification wait.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationReport {
    /// Terminal state observed (or `Errored` on timeout).
    pub state: VerificationState,
    /// Number of state queries issued.
    pub polls: u32,
    /// Set when the poller itself produced the state (timeout).
    pub reason: Option<String>,
}

/// Wait for a proposal's verification to reach a terminal state.
///
/// Each query goes through the transient-retry policy; a non-transient
/// gateway failure aborts the wait and surfaces to the caller. Querying
/// has no side effects on the external system, so the loop is idempotent
/// and safe to cancel between waits.
pub async fn await_verification(
    gateway: &dyn HostGateway,
    proposal: &ProposalRef,
    config: &PollerConfig,
    retry: &RetryPolicy,
) -> GatewayResult<VerificationReport> {
    let deadline = Instant::now() + config.deadline;
    let mut polls = 0u32;

    loop {
        let state = with_retry(retry, "verification_state", || {
            gateway.verification_state(proposal)
        })
        .await?;
        polls += 1;

        debug!(
            event = "verification.polled",
            proposal = %proposal,
            state = %state,
            polls = polls,
        );

        if state.is_terminal() {
            return Ok(VerificationReport {
                state,
                polls,
                reason: None,
            });
        }

        // The next sleep would cross the deadline: report timeout now
        // rather than block past the budget.
        if Instant::now() + config.interval >= deadline {
            return Ok(VerificationReport {
                state: VerificationState::Errored,
                polls,
                reason: Some("timeout".to_string()),
            });
        }

        tokio::time::sleep(config.interval).await;
    }
}
