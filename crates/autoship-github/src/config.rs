//! GitHub backend configuration.

use serde::{Deserialize, Serialize};

/// GitHub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// Repository owner (user or organization)
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Personal access token or installation token
    pub token: Option<String>,
    /// API base URL (override for GitHub Enterprise)
    pub api_base: String,
    /// `repository_dispatch` event type used to trigger deployments
    pub deploy_event_type: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        GithubConfig {
            owner: std::env::var("AUTOSHIP_GITHUB_OWNER").unwrap_or_default(),
            repo: std::env::var("AUTOSHIP_GITHUB_REPO").unwrap_or_default(),
            token: std::env::var("AUTOSHIP_GITHUB_TOKEN").ok(),
            api_base: std::env::var("AUTOSHIP_GITHUB_API")
                .unwrap_or_else(|_| "https://api.github.com".to_string()),
            deploy_event_type: std::env::var("AUTOSHIP_DEPLOY_EVENT")
                .unwrap_or_else(|_| "autoship-deploy".to_string()),
        }
    }
}

impl GithubConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create config for a specific repository
    pub fn new(owner: &str, repo: &str) -> Self {
        GithubConfig {
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: None,
            api_base: "https://api.github.com".to_string(),
            deploy_event_type: "autoship-deploy".to_string(),
        }
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Set the API base URL
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Set the deploy dispatch event type
    pub fn with_deploy_event(mut self, event_type: &str) -> Self {
        self.deploy_event_type = event_type.to_string();
        self
    }

    /// Base URL for repository-scoped API routes.
    pub fn repo_url(&self) -> String {
        format!("{}/repos/{}/{}", self.api_base, self.owner, self.repo)
    }
}
