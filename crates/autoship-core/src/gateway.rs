//! Version-control host gateway.
//!
//! The pipeline depends on this trait for every side effect against the
//! external host: branches, commits, change proposals, verification
//! status, merge, and compensating cleanup. Implementations live in
//! backend crates (e.g. `autoship-github`); an in-memory fake for tests
//! is provided in [`crate::fakes`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result type for gateway operations.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// A named branch in the external host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchName(pub String);

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable revision reference (commit SHA or equivalent).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionRef(pub String);

impl std::fmt::Display for RevisionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A change proposal (pull/merge request) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposalRef(pub String);

impl std::fmt::Display for ProposalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One file touched by a changeset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    /// Repository-relative path.
    pub path: String,
    /// Full new content of the file.
    pub content: String,
}

/// The set of file changes produced by the implementation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    /// One-line summary used as part of the commit message.
    pub summary: String,
    /// Files to write on the run's branch.
    pub files: Vec<FileChange>,
}

/// Aggregate CI verification state for a proposal's head revision.
///
/// Owned by the external CI system; the pipeline only ever observes it
/// through the gateway and never synthesizes a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Pending,
    Running,
    Passed,
    Failed,
    Errored,
}

impl VerificationState {
    /// Whether the state will no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VerificationState::Passed | VerificationState::Failed | VerificationState::Errored
        )
    }
}

impl std::fmt::Display for VerificationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VerificationState::Pending => "pending",
            VerificationState::Running => "running",
            VerificationState::Passed => "passed",
            VerificationState::Failed => "failed",
            VerificationState::Errored => "errored",
        };
        write!(f, "{name}")
    }
}

/// Errors from the version-control host.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("branch already exists: {0}")]
    BranchExists(String),

    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("commit conflict on branch '{branch}': {detail}")]
    CommitConflict { branch: String, detail: String },

    #[error("proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("proposal not mergeable: {0}")]
    NotMergeable(String),

    #[error("proposal already merged: {0}")]
    AlreadyMerged(String),

    /// Network failures, rate limits, host 5xx. Safe to retry.
    #[error("transient gateway error: {0}")]
    Transient(String),

    #[error("gateway error: {0}")]
    Other(String),
}

impl GatewayError {
    /// Whether a bounded retry is appropriate for this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

/// Operations the pipeline performs against the version-control host.
///
/// Every operation must be safe to retry on transient network failure:
/// either idempotent or checked-before-acting on the host side.
#[async_trait]
pub trait HostGateway: Send + Sync {
    /// Create `name` pointing at `from_ref`.
    ///
    /// Fails with [`GatewayError::BranchExists`] if the branch exists and
    /// [`GatewayError::RefNotFound`] if `from_ref` does not.
    async fn create_branch(&self, name: &BranchName, from_ref: &str) -> GatewayResult<()>;

    /// Commit `changeset` to `branch`, returning the new revision.
    async fn commit(
        &self,
        branch: &BranchName,
        changeset: &Changeset,
        message: &str,
    ) -> GatewayResult<RevisionRef>;

    /// Open a change proposal from `branch` into `base`.
    async fn open_proposal(
        &self,
        branch: &BranchName,
        base: &str,
        title: &str,
        body: &str,
    ) -> GatewayResult<ProposalRef>;

    /// Read the aggregate verification state for a proposal.
    ///
    /// Idempotent: observing the state has no side effects on the host.
    async fn verification_state(&self, proposal: &ProposalRef)
        -> GatewayResult<VerificationState>;

    /// Merge the proposal into its base.
    async fn merge(&self, proposal: &ProposalRef) -> GatewayResult<()>;

    /// Close a proposal without merging. Compensating action on abort.
    async fn close_proposal(&self, proposal: &ProposalRef) -> GatewayResult<()>;

    /// Delete a branch. Compensating action on abort; no-op if absent.
    async fn delete_branch(&self, name: &BranchName) -> GatewayResult<()>;
}

/// Fire-and-forget deployment trigger invoked after a successful merge.
///
/// The pipeline signals "deploy requested" and logs the result; it never
/// gates run state on the deployment itself.
#[async_trait]
pub trait DeployTrigger: Send + Sync {
    async fn request_deploy(&self, revision: &RevisionRef) -> GatewayResult<()>;
}
