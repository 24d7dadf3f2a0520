//! Autoship Core Library
//!
//! The automated change-request pipeline: state machine, run registry,
//! verification poller, and the trait seams for version-control hosts
//! and stage capabilities.

pub mod config;
pub mod domain;
pub mod fakes;
pub mod gateway;
pub mod obs;
pub mod pipeline;
pub mod poller;
pub mod registry;
pub mod retry;
pub mod stage;
pub mod telemetry;

pub use config::PipelineConfig;
pub use domain::{
    ChangeRequest, Disposition, FeatureKey, PipelineError, PipelineRun, Priority, Result,
    RunState, RunStatus,
};
pub use gateway::{
    BranchName, Changeset, DeployTrigger, FileChange, GatewayError, GatewayResult, HostGateway,
    ProposalRef, RevisionRef, VerificationState,
};
pub use pipeline::{Pipeline, RunHandle};
pub use poller::{await_verification, PollerConfig, VerificationReport};
pub use registry::RunRegistry;
pub use retry::{with_retry, RetryPolicy};
pub use stage::{
    CapabilityError, OutcomeKind, StageCapability, StageContext, StageKind, StageOutcome,
};
pub use telemetry::init_tracing;

/// Autoship version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
