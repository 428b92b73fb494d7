//! Abstract tool interface (§6.5).
//!
//! Real tool implementations (web search, subprocess execution, file I/O)
//! are explicitly out of scope; this module ships only the trait, the
//! result shape, and the registration-mode vocabulary the dispatcher
//! (`axon-runtime`) uses.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Outcome of a single tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    pub value: Value,
    pub metadata: Value,
}

impl ToolResult {
    pub fn success(value: Value) -> Self {
        Self {
            ok: true,
            value,
            metadata: Value::Null,
        }
    }

    pub fn failure(value: Value) -> Self {
        Self {
            ok: false,
            value,
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Error surfaced by a tool implementation itself (distinct from a timeout,
/// which the dispatcher enforces independently of the tool's own result).
#[derive(Debug, Clone, thiserror::Error)]
#[error("tool invocation failed: {0}")]
pub struct ToolError(pub String);

/// Registration mode for a tool entry in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolMode {
    /// Returns deterministic canned data; used in tests.
    Stub,
    /// Fails to register if required credentials/dependencies are absent.
    Real,
    /// Real where possible, falls back to stubs elsewhere.
    Hybrid,
}

/// Abstract contract a concrete tool implementation satisfies.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Invoke the tool. Implementations should respect `timeout`
    /// themselves where practical, but the dispatcher also enforces it
    /// independently and yields `TimeoutError` if exceeded.
    async fn invoke(
        &self,
        argument: Value,
        config: Value,
        timeout: Duration,
    ) -> Result<ToolResult, ToolError>;

    fn mode(&self) -> ToolMode;
}

/// A tool registered under the `Stub` mode: returns a fixed `ToolResult`
/// regardless of argument, optionally after an artificial delay (used to
/// exercise the dispatcher's timeout enforcement in tests).
pub struct StubTool {
    result: ToolResult,
    delay: Duration,
}

impl StubTool {
    pub fn new(result: ToolResult) -> Self {
        Self {
            result,
            delay: Duration::from_millis(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Tool for StubTool {
    async fn invoke(
        &self,
        _argument: Value,
        _config: Value,
        _timeout: Duration,
    ) -> Result<ToolResult, ToolError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.result.clone())
    }

    fn mode(&self) -> ToolMode {
        ToolMode::Stub
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_tool_returns_its_fixed_result() {
        let tool = StubTool::new(ToolResult::success(serde_json::json!({"hits": 3})));
        let result = tool
            .invoke(Value::Null, Value::Null, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.value, serde_json::json!({"hits": 3}));
    }

    #[test]
    fn tool_result_builders_set_ok_flag() {
        assert!(ToolResult::success(Value::Null).ok);
        assert!(!ToolResult::failure(Value::Null).ok);
    }
}
