//! Stage capability contract.
//!
//! Every pipeline stage (requirement extraction, design, security gate,
//! implementation) is an external capability behind one polymorphic
//! trait: consume the run context, produce a structured [`StageOutcome`].
//! The pipeline never knows how a capability computes its answer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::request::{ChangeRequest, FeatureKey};
use crate::gateway::Changeset;

/// Stages recorded in a run's outcome log.
///
/// The first four are performed by external capabilities. `Verification`
/// is recorded by the pipeline itself from the externally observed CI
/// result; it is never dispatched to a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    RequirementExtraction,
    Design,
    SecurityGate,
    Implementation,
    Verification,
}

impl StageKind {
    /// Stage name as used in logs, status output, and capability URLs.
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::RequirementExtraction => "requirement_extraction",
            StageKind::Design => "design",
            StageKind::SecurityGate => "security_gate",
            StageKind::Implementation => "implementation",
            StageKind::Verification => "verification",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Result kind of one stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Failure,
    NeedsInput,
}

/// The recorded result of one stage invocation.
///
/// Appended to the run's outcome log and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Which stage produced this outcome.
    pub stage: StageKind,

    /// Success, failure, or needs-input.
    pub kind: OutcomeKind,

    /// Structured artifact: requirements, design document, security
    /// verdict, or code changeset. Opaque to the pipeline except for the
    /// accessors below.
    pub payload: serde_json::Value,

    /// Explanation on failure or needs-input.
    pub reason: Option<String>,

    /// When the outcome was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl StageOutcome {
    /// Successful outcome with an artifact payload.
    pub fn success(stage: StageKind, payload: serde_json::Value) -> Self {
        Self {
            stage,
            kind: OutcomeKind::Success,
            payload,
            reason: None,
            recorded_at: Utc::now(),
        }
    }

    /// Failed outcome with a reason.
    pub fn failure(stage: StageKind, reason: impl Into<String>) -> Self {
        Self {
            stage,
            kind: OutcomeKind::Failure,
            payload: serde_json::Value::Null,
            reason: Some(reason.into()),
            recorded_at: Utc::now(),
        }
    }

    /// Outcome signalling the capability needs clarification.
    pub fn needs_input(stage: StageKind, reason: impl Into<String>) -> Self {
        Self {
            stage,
            kind: OutcomeKind::NeedsInput,
            payload: serde_json::Value::Null,
            reason: Some(reason.into()),
            recorded_at: Utc::now(),
        }
    }

    /// Whether the outcome advances the pipeline.
    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }

    /// Opaque flag set by requirement extraction when the request needs a
    /// design artifact. Absent means no design stage.
    pub fn needs_design(&self) -> bool {
        self.payload
            .get("needs_design")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Changeset produced by the implementation stage, if present.
    pub fn changeset(&self) -> Option<Changeset> {
        self.payload
            .get("changeset")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Reason string, or a stage-kind fallback when absent.
    pub fn reason_or_default(&self) -> String {
        self.reason
            .clone()
            .unwrap_or_else(|| format!("{} reported {:?}", self.stage, self.kind))
    }
}

/// Context handed to a capability: the request plus everything the
/// pipeline has learned so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageContext {
    pub feature_key: FeatureKey,
    pub request: ChangeRequest,
    pub prior_outcomes: Vec<StageOutcome>,
}

/// Infrastructure errors from invoking a capability.
///
/// These are distinct from semantic failure (a [`StageOutcome`] with
/// `kind = Failure`): an `Err` here means the capability could not be
/// reached or answered garbage, and the pipeline converts it into a
/// failure outcome without retrying.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("capability unreachable: {0}")]
    Unreachable(String),

    #[error("capability returned invalid outcome: {0}")]
    InvalidOutcome(String),
}

/// Uniform contract every external stage implements.
///
/// One trait with a stage-kind variant rather than a class per stage:
/// each stage is a function from (request, prior outcomes) to outcome,
/// and the orchestrator stays decoupled from how content is produced.
#[async_trait]
pub trait StageCapability: Send + Sync {
    async fn invoke(
        &self,
        stage: StageKind,
        context: &StageContext,
    ) -> std::result::Result<StageOutcome, CapabilityError>;
}
