//! Agent endpoint configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Agent endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEndpointConfig {
    /// Base URL of the agent service
    pub base_url: String,
    /// Bearer token (optional for unauthenticated deployments)
    pub token: Option<String>,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for AgentEndpointConfig {
    fn default() -> Self {
        AgentEndpointConfig {
            base_url: std::env::var("AUTOSHIP_AGENT_URL")
                .unwrap_or_else(|_| "http://localhost:8900".to_string()),
            token: std::env::var("AUTOSHIP_AGENT_TOKEN").ok(),
            request_timeout_secs: 110,
        }
    }
}

impl AgentEndpointConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create config for a specific agent service
    pub fn new(base_url: &str) -> Self {
        AgentEndpointConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            request_timeout_secs: 110,
        }
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Set the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    /// URL the capability for `stage_name` is served at.
    pub fn stage_url(&self, stage_name: &str) -> String {
        format!("{}/stages/{}", self.base_url.trim_end_matches('/'), stage_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_config_new() {
        let config = AgentEndpointConfig::new("http://agents.internal:8900/");
        assert_eq!(config.base_url, "http://agents.internal:8900");
        assert!(config.token.is_none());
    }

    #[test]
    fn test_stage_url() {
        let config = AgentEndpointConfig::new("http://agents.internal:8900");
        assert_eq!(
            config.stage_url("security_gate"),
            "http://agents.internal:8900/stages/security_gate"
        );
    }

    #[test]
    fn test_with_request_timeout() {
        let config =
            AgentEndpointConfig::new("http://x").with_request_timeout(Duration::from_secs(30));
        assert_eq!(config.request_timeout_secs, 30);
    }
}
