//! Abstract model client interface (§6.4).
//!
//! Concrete provider adapters (Anthropic/OpenAI/Gemini/local HTTP glue) are
//! explicitly out of scope; this module ships only the trait and a
//! deterministic in-memory stub used by the executor's own tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Where a step output's confidence value came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConfidenceSource {
    /// Reported directly by the model backend.
    Backend,
    /// No value was reported; the executor defaulted it (§9).
    Defaulted,
}

/// System + user content sent to a model client for a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// System instructions derived from persona + context + anchors.
    pub system_instructions: String,
    /// User content derived from the step being executed.
    pub user_content: String,
    /// JSON schema describing the expected output shape.
    pub output_schema: Value,
    /// Maximum tokens the backend may spend on this request.
    pub max_tokens: u32,
    /// Set when this request is a refinement: the prior attempt's rejected
    /// output and the reason it was rejected.
    pub previous_attempt: Option<PreviousAttempt>,
}

/// The "previous_attempt + why_rejected" context threaded into a refine
/// attempt (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviousAttempt {
    pub output: Value,
    pub why_rejected: String,
}

/// Raw token usage reported by a backend.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Response from a model client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub output: Value,
    pub confidence: Option<f64>,
    pub token_usage: TokenUsage,
}

/// Abstract contract a concrete provider adapter implements. Kept
/// deliberately narrow: the core never depends on any SDK or HTTP client.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelClientError>;
}

/// Error surfaced by a model client implementation; wrapped by the executor
/// into `AxonError::Runtime` with the failing step's id attached.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelClientError {
    #[error("model client unavailable: {0}")]
    Unavailable(String),
    #[error("model client returned malformed output: {0}")]
    MalformedOutput(String),
}

/// Deterministic in-memory stub for tests: returns pre-registered responses
/// keyed by the user content of the request, erroring if nothing was
/// registered for that content.
pub struct StubModelClient {
    responses: HashMap<String, ModelResponse>,
}

impl StubModelClient {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
        }
    }

    pub fn with_response(mut self, user_content: impl Into<String>, response: ModelResponse) -> Self {
        self.responses.insert(user_content.into(), response);
        self
    }
}

impl Default for StubModelClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelClient for StubModelClient {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelClientError> {
        self.responses
            .get(&request.user_content)
            .cloned()
            .ok_or_else(|| {
                ModelClientError::Unavailable(format!(
                    "no stub response registered for '{}'",
                    request.user_content
                ))
            })
    }
}

/// Resolve the confidence an executor should record for a step output,
/// given what the backend reported and the floors in scope (anchor,
/// context, persona). Implements the resolved open question in §9: the
/// most restrictive floor wins; a crate-level default is used only if no
/// floor is in scope anywhere, and the source is always recorded so the
/// provenance is auditable.
pub fn resolve_confidence(
    reported: Option<f64>,
    floors_in_scope: &[f64],
    crate_default: f64,
) -> (f64, ConfidenceSource) {
    if let Some(value) = reported {
        return (value, ConfidenceSource::Backend);
    }

    let most_restrictive = floors_in_scope
        .iter()
        .copied()
        .fold(None, |acc: Option<f64>, floor| {
            Some(acc.map_or(floor, |a| a.max(floor)))
        });

    (
        most_restrictive.unwrap_or(crate_default),
        ConfidenceSource::Defaulted,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn stub_client_returns_registered_response() {
        let client = StubModelClient::new().with_response(
            "hi",
            ModelResponse {
                output: serde_json::json!({"text": "hello"}),
                confidence: Some(0.9),
                token_usage: TokenUsage::default(),
            },
        );
        let response = client
            .complete(ModelRequest {
                system_instructions: String::new(),
                user_content: "hi".to_string(),
                output_schema: serde_json::json!({}),
                max_tokens: 100,
                previous_attempt: None,
            })
            .await
            .unwrap();
        assert_eq!(response.confidence, Some(0.9));
    }

    #[tokio::test]
    async fn stub_client_errors_on_unregistered_content() {
        let client = StubModelClient::new();
        let result = client
            .complete(ModelRequest {
                system_instructions: String::new(),
                user_content: "unknown".to_string(),
                output_schema: serde_json::json!({}),
                max_tokens: 100,
                previous_attempt: None,
            })
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn resolve_confidence_prefers_backend_value() {
        let (value, source) = resolve_confidence(Some(0.7), &[0.9], 0.5);
        assert_eq!(value, 0.7);
        assert_eq!(source, ConfidenceSource::Backend);
    }

    #[test]
    fn resolve_confidence_takes_most_restrictive_floor() {
        let (value, source) = resolve_confidence(None, &[0.6, 0.9, 0.4], 0.5);
        assert_eq!(value, 0.9);
        assert_eq!(source, ConfidenceSource::Defaulted);
    }

    #[test]
    fn resolve_confidence_falls_back_to_crate_default() {
        let (value, source) = resolve_confidence(None, &[], 0.5);
        assert_eq!(value, 0.5);
        assert_eq!(source, ConfidenceSource::Defaulted);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Whatever the backend reports, it always wins and is never
        /// silently replaced by a floor or the crate default (§9).
        #[test]
        fn prop_reported_confidence_always_wins(
            reported in 0.0f64..=1.0,
            floors in prop::collection::vec(0.0f64..=1.0, 0..5),
            default in 0.0f64..=1.0,
        ) {
            let (value, source) = resolve_confidence(Some(reported), &floors, default);
            prop_assert_eq!(value, reported);
            prop_assert_eq!(source, ConfidenceSource::Backend);
        }

        /// With no reported value, the resolved confidence is always the
        /// single most restrictive (highest) floor in scope, never any
        /// other floor and never the crate default while a floor exists.
        #[test]
        fn prop_defaulted_confidence_is_the_most_restrictive_floor(
            floors in prop::collection::vec(0.0f64..=1.0, 1..8),
            default in 0.0f64..=1.0,
        ) {
            let expected = floors.iter().copied().fold(f64::MIN, f64::max);
            let (value, source) = resolve_confidence(None, &floors, default);
            prop_assert_eq!(value, expected);
            prop_assert_eq!(source, ConfidenceSource::Defaulted);
        }
    }
}
