//! Domain-level error taxonomy for autoship.

use uuid::Uuid;

use crate::gateway::GatewayError;

/// Pipeline errors surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// An active run already holds the lock for this feature key.
    #[error("active run {run_id} already exists for feature '{feature_key}'")]
    DuplicateRun { feature_key: String, run_id: Uuid },

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("no run registered for feature '{0}'")]
    FeatureNotFound(String),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("stage '{stage}' failed: {reason}")]
    StageFailed { stage: String, reason: String },

    #[error("run was cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_run_display() {
        let err = PipelineError::DuplicateRun {
            feature_key: "abc123".to_string(),
            run_id: Uuid::new_v4(),
        };
        let msg = err.to_string();
        assert!(msg.contains("already exists"));
        assert!(msg.contains("abc123"));
    }

    #[test]
    fn test_stage_failed_display() {
        let err = PipelineError::StageFailed {
            stage: "security_gate".to_string(),
            reason: "secrets committed in diff".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("security_gate"));
        assert!(msg.contains("secrets"));
    }

    #[test]
    fn test_gateway_error_converts() {
        let err: PipelineError = GatewayError::Transient("rate limited".to_string()).into();
        assert!(err.to_string().contains("rate limited"));
    }
}
