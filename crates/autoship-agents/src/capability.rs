//! HTTP stage capability client.
//!
//! POSTs the run's [`StageContext`] to `{base_url}/stages/{stage}` and
//! expects a [`StageOutcome`] back. The pipeline applies its own per-stage
//! timeout on top; the client timeout here only guards against a hung
//! connection outliving the stage budget.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use autoship_core::{CapabilityError, StageCapability, StageContext, StageKind, StageOutcome};

use crate::config::AgentEndpointConfig;

const USER_AGENT: &str = concat!("autoship/", env!("CARGO_PKG_VERSION"));

/// Stage capability served by an external agent endpoint.
pub struct HttpStageCapability {
    config: AgentEndpointConfig,
    http: reqwest::Client,
}

impl HttpStageCapability {
    /// Build a client for the configured agent service.
    pub fn new(config: AgentEndpointConfig) -> Result<Self, CapabilityError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CapabilityError::Unreachable(format!("http client: {e}")))?;
        Ok(HttpStageCapability { config, http })
    }

    /// Build a client from environment variables.
    pub fn from_env() -> Result<Self, CapabilityError> {
        Self::new(AgentEndpointConfig::from_env())
    }
}

#[async_trait]
impl StageCapability for HttpStageCapability {
    async fn invoke(
        &self,
        stage: StageKind,
        context: &StageContext,
    ) -> Result<StageOutcome, CapabilityError> {
        let url = self.config.stage_url(stage.name());
        debug!(event = "agent.invoking", stage = %stage, url = %url);

        let mut builder = self.http.post(&url).json(context);
        if let Some(token) = &self.config.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CapabilityError::Unreachable(format!("{stage} at {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Unreachable(format!(
                "{stage} returned status {}: {}",
                status.as_u16(),
                truncate(&body),
            )));
        }

        let outcome: StageOutcome = response
            .json()
            .await
            .map_err(|e| CapabilityError::InvalidOutcome(format!("{stage}: {e}")))?;

        // An endpoint answering for the wrong stage corrupts the outcome
        // log; treat it as an invalid answer, not a failure outcome.
        if outcome.stage != stage {
            return Err(CapabilityError::InvalidOutcome(format!(
                "asked for {stage}, endpoint answered for {}",
                outcome.stage,
            )));
        }

        debug!(event = "agent.answered", stage = %stage, outcome = ?outcome.kind);
        Ok(outcome)
    }
}

fn truncate(body: &str) -> &str {
    let mut end = body.len().min(200);
    // Never slice mid-character; error bodies are arbitrary UTF-8.
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoship_core::ChangeRequest;
    use serde_json::json;

    fn context() -> StageContext {
        let request = ChangeRequest::new("add stats chart", "plot points per game");
        StageContext {
            feature_key: request.feature_key(),
            request,
            prior_outcomes: Vec::new(),
        }
    }

    #[test]
    fn test_context_wire_format() {
        let json = serde_json::to_value(context()).expect("serialize");
        assert!(json.get("feature_key").is_some());
        assert_eq!(json["request"]["title"], "add stats chart");
        assert!(json["prior_outcomes"].as_array().expect("array").is_empty());
    }

    #[test]
    fn test_outcome_wire_format_parses() {
        // Shape an agent endpoint actually sends back.
        let wire = json!({
            "stage": "requirement_extraction",
            "kind": "success",
            "payload": {"requirements": ["plot points per game"], "needs_design": false},
            "reason": null,
            "recorded_at": "2026-08-01T12:00:00Z"
        });
        let outcome: StageOutcome = serde_json::from_value(wire).expect("deserialize");
        assert_eq!(outcome.stage, StageKind::RequirementExtraction);
        assert!(outcome.is_success());
        assert!(!outcome.needs_design());
    }

    #[test]
    fn test_error_body_truncation_never_splits_multibyte_chars() {
        // Three bytes per char, so the 200-byte cap lands mid-character.
        let body = "€".repeat(100);
        let cut = truncate(&body);
        assert!(cut.len() <= 200);
        assert!(cut.chars().all(|c| c == '€'));
        assert_eq!(truncate("short"), "short");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_capability_error() {
        // Nothing listens on this port.
        let capability = HttpStageCapability::new(
            AgentEndpointConfig::new("http://127.0.0.1:1").with_request_timeout(Duration::from_secs(1)),
        )
        .expect("client");

        let err = capability
            .invoke(StageKind::SecurityGate, &context())
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Unreachable(_)));
    }
}
