//! Pipeline configuration.
//!
//! All tunables are passed explicitly at construction time; there are no
//! ambient process-wide globals.

use std::time::Duration;

use crate::poller::PollerConfig;
use crate::retry::RetryPolicy;

/// Configuration for the pipeline state machine.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Base branch that proposals target and branches fork from.
    pub base_branch: String,

    /// Timeout applied to each stage capability invocation.
    pub stage_timeout: Duration,

    /// Verification poll interval and deadline.
    pub poller: PollerConfig,

    /// Transient-failure retry policy for gateway calls.
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            stage_timeout: Duration::from_secs(120),
            poller: PollerConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Set the base branch.
    pub fn with_base_branch(mut self, base: impl Into<String>) -> Self {
        self.base_branch = base.into();
        self
    }

    /// Set the per-stage capability timeout.
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Set the verification poller configuration.
    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    /// Set the gateway retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
