//! Tool dispatcher & registry (§4.9).
//!
//! A provider-trait-plus-capability pattern (`ProviderCapability`,
//! `CircuitState`) drives the stub/real/hybrid split; a
//! `compute_content_hash` (`Sha256` + `hex`) keys a registry entry by its
//! configuration snapshot — "the same tool under different configs is a
//! different registry entry" (§4.9) is exactly a content-addressed map.

use axon_core::tool::{Tool, ToolError, ToolMode, ToolResult};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Error surfaced by the dispatcher itself, distinct from a tool's own
/// `ToolError` (wrapped inside `Tool`).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolDispatchError {
    #[error("no tool registered under name '{0}' for this configuration")]
    NotFound(String),
    #[error("tool invocation exceeded its {0:?} timeout")]
    Timeout(Duration),
    #[error(transparent)]
    Tool(#[from] ToolError),
}

fn config_key(config: &Value) -> String {
    let canonical = serde_json::to_vec(config).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    hex::encode(digest)
}

struct Entry {
    tool: Arc<dyn Tool>,
    mode: ToolMode,
}

/// In-process registry mapping `(tool name, config hash)` to an
/// implementation. Read-only after construction (§5's "shared resources"
/// note) — registration happens up front, `invoke` never mutates.
#[derive(Default)]
pub struct ToolRegistry {
    entries: HashMap<(String, String), Entry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under `name` for the given configuration snapshot.
    /// A `Real`-mode tool that could not obtain its credentials/dependencies
    /// is expected to have failed during its own construction — the
    /// registry does not second-guess a `Tool` impl that was handed to it.
    pub fn register(&mut self, name: impl Into<String>, config: &Value, tool: Arc<dyn Tool>) {
        let mode = tool.mode();
        self.entries
            .insert((name.into(), config_key(config)), Entry { tool, mode });
    }

    pub fn mode_of(&self, name: &str, config: &Value) -> Option<ToolMode> {
        self.entries.get(&(name.to_string(), config_key(config))).map(|e| e.mode)
    }

    /// Invoke the tool registered under `name` for `config`, enforcing
    /// `timeout` independently of whatever the tool implementation does
    /// internally (§4.9: "timeouts are mandatory").
    pub async fn invoke(
        &self,
        name: &str,
        config: &Value,
        argument: Value,
        timeout: Duration,
    ) -> Result<ToolResult, ToolDispatchError> {
        let entry = self
            .entries
            .get(&(name.to_string(), config_key(config)))
            .ok_or_else(|| ToolDispatchError::NotFound(name.to_string()))?;

        match tokio::time::timeout(timeout, entry.tool.invoke(argument, config.clone(), timeout)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(ToolDispatchError::Tool(err)),
            Err(_elapsed) => Err(ToolDispatchError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_core::tool::StubTool;

    #[tokio::test]
    async fn invokes_a_registered_stub_tool() {
        let mut registry = ToolRegistry::new();
        let config = serde_json::json!({ "provider": "test" });
        registry.register(
            "WebSearch",
            &config,
            Arc::new(StubTool::new(ToolResult::success(serde_json::json!({"hits": 1})))),
        );

        let result = registry
            .invoke("WebSearch", &config, Value::Null, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(result.ok);
    }

    #[tokio::test]
    async fn unregistered_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry
            .invoke("Missing", &Value::Null, Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolDispatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn same_tool_under_different_config_is_a_different_entry() {
        let mut registry = ToolRegistry::new();
        let config_a = serde_json::json!({ "max_results": 3 });
        let config_b = serde_json::json!({ "max_results": 10 });
        registry.register("Search", &config_a, Arc::new(StubTool::new(ToolResult::success(Value::Null))));

        assert!(registry
            .invoke("Search", &config_b, Value::Null, Duration::from_secs(1))
            .await
            .is_err());
        assert!(registry
            .invoke("Search", &config_a, Value::Null, Duration::from_secs(1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn exceeding_timeout_yields_timeout_error() {
        let mut registry = ToolRegistry::new();
        let config = serde_json::json!({});
        registry.register(
            "Slow",
            &config,
            Arc::new(StubTool::new(ToolResult::success(Value::Null)).with_delay(Duration::from_millis(50))),
        );

        let err = registry
            .invoke("Slow", &config, Value::Null, Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolDispatchError::Timeout(_)));
    }
}
