//! GitHub implementation of the host gateway.
//!
//! Maps the pipeline's gateway operations onto the GitHub REST API:
//! branches and commits through the git data API, change proposals as
//! pull requests, verification through the checks API, and deployments
//! through `repository_dispatch`.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use autoship_core::{
    BranchName, Changeset, DeployTrigger, GatewayError, GatewayResult, HostGateway, ProposalRef,
    RevisionRef, VerificationState,
};

use crate::checks::{aggregate_check_state, failing_check_names, CheckRun};
use crate::config::GithubConfig;

const USER_AGENT: &str = concat!("autoship/", env!("CARGO_PKG_VERSION"));

/// GitHub-backed host gateway and deploy trigger.
pub struct GithubGateway {
    config: GithubConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitCommit {
    tree: GitObject,
}

#[derive(Debug, Deserialize)]
struct CreatedObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    head: GitObject,
    #[serde(default)]
    merged: bool,
}

#[derive(Debug, Deserialize)]
struct CheckRunsPage {
    check_runs: Vec<CheckRun>,
}

impl GithubGateway {
    /// Build a gateway for the configured repository.
    pub fn new(config: GithubConfig) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| GatewayError::Other(format!("http client: {e}")))?;
        Ok(GithubGateway { config, http })
    }

    /// Build a gateway from environment variables.
    pub fn from_env() -> GatewayResult<Self> {
        Self::new(GithubConfig::from_env())
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.config.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> GatewayResult<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::Transient(format!("network: {e}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    async fn json<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> GatewayResult<T> {
        self.send(builder)
            .await?
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Other(format!("response decode: {e}")))
    }

    async fn ref_sha(&self, git_ref: &str) -> GatewayResult<String> {
        let url = format!("{}/git/ref/heads/{}", self.config.repo_url(), git_ref);
        let reference: GitRef = self
            .json(self.request(reqwest::Method::GET, url))
            .await
            .map_err(|e| match e {
                GatewayError::Other(detail) if detail.starts_with("status 404") => {
                    GatewayError::RefNotFound(git_ref.to_string())
                }
                other => other,
            })?;
        Ok(reference.object.sha)
    }

    async fn pull(&self, proposal: &ProposalRef) -> GatewayResult<PullRequest> {
        let url = format!("{}/pulls/{}", self.config.repo_url(), proposal.0);
        self.json(self.request(reqwest::Method::GET, url))
            .await
            .map_err(|e| match e {
                GatewayError::Other(detail) if detail.starts_with("status 404") => {
                    GatewayError::ProposalNotFound(proposal.0.clone())
                }
                other => other,
            })
    }
}

/// Map an HTTP failure status to a gateway error. Rate limits and host
/// 5xx responses are transient; everything else is not.
fn classify_status(status: StatusCode, body: &str) -> GatewayError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return GatewayError::Transient(format!("status {}: {}", status.as_u16(), truncate(body)));
    }
    GatewayError::Other(format!("status {}: {}", status.as_u16(), truncate(body)))
}

fn truncate(body: &str) -> &str {
    let mut end = body.len().min(200);
    // Never slice mid-character; error bodies are arbitrary UTF-8.
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[async_trait]
impl HostGateway for GithubGateway {
    async fn create_branch(&self, name: &BranchName, from_ref: &str) -> GatewayResult<()> {
        let sha = self.ref_sha(from_ref).await?;

        let url = format!("{}/git/refs", self.config.repo_url());
        let payload = json!({"ref": format!("refs/heads/{}", name.0), "sha": sha});
        match self.send(self.request(reqwest::Method::POST, url).json(&payload)).await {
            Ok(_) => {
                debug!(event = "github.branch_created", branch = %name, from = %from_ref);
                Ok(())
            }
            // 422 "Reference already exists"
            Err(GatewayError::Other(detail)) if detail.starts_with("status 422") => {
                Err(GatewayError::BranchExists(name.0.clone()))
            }
            Err(e) => Err(e),
        }
    }

    async fn commit(
        &self,
        branch: &BranchName,
        changeset: &Changeset,
        message: &str,
    ) -> GatewayResult<RevisionRef> {
        let repo = self.config.repo_url();
        let head = self.ref_sha(&branch.0).await?;

        let head_commit: GitCommit = self
            .json(self.request(reqwest::Method::GET, format!("{repo}/git/commits/{head}")))
            .await?;

        // One tree with every file's new content, based on the head tree.
        let entries: Vec<_> = changeset
            .files
            .iter()
            .map(|f| json!({"path": f.path, "mode": "100644", "type": "blob", "content": f.content}))
            .collect();
        let tree: CreatedObject = self
            .json(
                self.request(reqwest::Method::POST, format!("{repo}/git/trees"))
                    .json(&json!({"base_tree": head_commit.tree.sha, "tree": entries})),
            )
            .await?;

        let commit: CreatedObject = self
            .json(
                self.request(reqwest::Method::POST, format!("{repo}/git/commits"))
                    .json(&json!({"message": message, "tree": tree.sha, "parents": [head]})),
            )
            .await?;

        // Fast-forward the branch. A 422 here means the head moved under
        // us between read and update.
        let update = self
            .request(
                reqwest::Method::PATCH,
                format!("{repo}/git/refs/heads/{}", branch.0),
            )
            .json(&json!({"sha": commit.sha, "force": false}));
        match self.send(update).await {
            Ok(_) => {}
            Err(GatewayError::Other(detail)) if detail.starts_with("status 422") => {
                return Err(GatewayError::CommitConflict {
                    branch: branch.0.clone(),
                    detail,
                });
            }
            Err(e) => return Err(e),
        }

        info!(event = "github.committed", branch = %branch, revision = %commit.sha);
        Ok(RevisionRef(commit.sha))
    }

    async fn open_proposal(
        &self,
        branch: &BranchName,
        base: &str,
        title: &str,
        body: &str,
    ) -> GatewayResult<ProposalRef> {
        let url = format!("{}/pulls", self.config.repo_url());
        let payload = json!({"title": title, "head": branch.0, "base": base, "body": body});
        let pull: PullRequest = self
            .json(self.request(reqwest::Method::POST, url).json(&payload))
            .await?;

        info!(event = "github.proposal_opened", branch = %branch, number = pull.number);
        Ok(ProposalRef(pull.number.to_string()))
    }

    async fn verification_state(
        &self,
        proposal: &ProposalRef,
    ) -> GatewayResult<VerificationState> {
        let head = self.pull(proposal).await?.head.sha;

        let url = format!(
            "{}/commits/{}/check-runs?per_page=100",
            self.config.repo_url(),
            head
        );
        let page: CheckRunsPage = self.json(self.request(reqwest::Method::GET, url)).await?;

        let state = aggregate_check_state(&page.check_runs);
        debug!(
            event = "github.checks_observed",
            proposal = %proposal,
            revision = %head,
            runs = page.check_runs.len(),
            state = %state,
        );
        if matches!(state, VerificationState::Failed | VerificationState::Errored) {
            warn!(
                event = "github.checks_failing",
                proposal = %proposal,
                failing = ?failing_check_names(&page.check_runs),
            );
        }
        Ok(state)
    }

    async fn merge(&self, proposal: &ProposalRef) -> GatewayResult<()> {
        let url = format!("{}/pulls/{}/merge", self.config.repo_url(), proposal.0);
        let payload = json!({"merge_method": "squash"});
        match self.send(self.request(reqwest::Method::PUT, url).json(&payload)).await {
            Ok(_) => {
                info!(event = "github.merged", proposal = %proposal);
                Ok(())
            }
            // 405/409: distinguish "someone merged it first" from a
            // genuinely unmergeable pull request.
            Err(GatewayError::Other(detail))
                if detail.starts_with("status 405") || detail.starts_with("status 409") =>
            {
                if self.pull(proposal).await?.merged {
                    Err(GatewayError::AlreadyMerged(proposal.0.clone()))
                } else {
                    Err(GatewayError::NotMergeable(detail))
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn close_proposal(&self, proposal: &ProposalRef) -> GatewayResult<()> {
        let url = format!("{}/pulls/{}", self.config.repo_url(), proposal.0);
        self.send(
            self.request(reqwest::Method::PATCH, url)
                .json(&json!({"state": "closed"})),
        )
        .await?;
        info!(event = "github.proposal_closed", proposal = %proposal);
        Ok(())
    }

    async fn delete_branch(&self, name: &BranchName) -> GatewayResult<()> {
        let url = format!("{}/git/refs/heads/{}", self.config.repo_url(), name.0);
        match self.send(self.request(reqwest::Method::DELETE, url)).await {
            Ok(_) => {
                debug!(event = "github.branch_deleted", branch = %name);
                Ok(())
            }
            // Already gone: deletion is a no-op for absent branches.
            Err(GatewayError::Other(detail))
                if detail.starts_with("status 404") || detail.starts_with("status 422") =>
            {
                warn!(event = "github.branch_already_absent", branch = %name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl DeployTrigger for GithubGateway {
    async fn request_deploy(&self, revision: &RevisionRef) -> GatewayResult<()> {
        let url = format!("{}/dispatches", self.config.repo_url());
        let payload = json!({
            "event_type": self.config.deploy_event_type,
            "client_payload": {"revision": revision.0},
        });
        self.send(self.request(reqwest::Method::POST, url).json(&payload))
            .await?;
        info!(
            event = "github.deploy_dispatched",
            revision = %revision,
            dispatch = %self.config.deploy_event_type,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_and_5xx_are_transient() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(classify_status(StatusCode::INTERNAL_SERVER_ERROR, "").is_transient());
    }

    #[test]
    fn test_client_errors_are_not_transient() {
        assert!(!classify_status(StatusCode::NOT_FOUND, "").is_transient());
        assert!(!classify_status(StatusCode::UNPROCESSABLE_ENTITY, "").is_transient());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "").is_transient());
    }

    #[test]
    fn test_classify_keeps_status_prefix() {
        let err = classify_status(StatusCode::UNPROCESSABLE_ENTITY, "Reference already exists");
        match err {
            GatewayError::Other(detail) => {
                assert!(detail.starts_with("status 422"));
                assert!(detail.contains("Reference already exists"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_truncate_caps_long_bodies() {
        let body = "x".repeat(1000);
        assert_eq!(truncate(&body).len(), 200);
        assert_eq!(truncate("short"), "short");
    }

    #[test]
    fn test_truncate_never_splits_multibyte_chars() {
        // Three bytes per char, so the 200-byte cap lands mid-character.
        let body = "€".repeat(100);
        let cut = truncate(&body);
        assert!(cut.len() <= 200);
        assert!(cut.chars().all(|c| c == '€'));

        // The classification path that feeds on it must not panic.
        let err = classify_status(StatusCode::BAD_REQUEST, &body);
        assert!(matches!(err, GatewayError::Other(_)));
    }

    #[test]
    fn test_pull_request_payload_parses() {
        let json = r#"{
            "number": 42,
            "head": {"sha": "abc123"},
            "merged": true,
            "title": "add stats chart"
        }"#;
        let pull: PullRequest = serde_json::from_str(json).expect("deserialize");
        assert_eq!(pull.number, 42);
        assert_eq!(pull.head.sha, "abc123");
        assert!(pull.merged);
    }

    #[test]
    fn test_check_runs_page_parses() {
        let json = r#"{
            "total_count": 2,
            "check_runs": [
                {"name": "test", "status": "completed", "conclusion": "success"},
                {"name": "fmt", "status": "in_progress", "conclusion": null}
            ]
        }"#;
        let page: CheckRunsPage = serde_json::from_str(json).expect("deserialize");
        assert_eq!(page.check_runs.len(), 2);
        assert_eq!(
            aggregate_check_state(&page.check_runs),
            VerificationState::Running
        );
    }
}
