use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::tool_output::ToolOutput;

/// `generator` tools are output tools, offered only to the output selector,
/// never to the planner. `preprocessors` run ahead of the graph and are
/// listed here only so the registry has one place tools are categorized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Libs,
    Generator,
    Preprocessors,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool execution failed: {0}")]
    Execution(String),
}

/// A single callable tool the planner or output selector can choose.
///
/// Tools never return `status: error` themselves — `execute` failing at the
/// Rust level (an `Err`) is what becomes `error` downstream, synthesized by
/// the tool executor, not by the tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn category(&self) -> ToolCategory;

    fn input_schema(&self) -> Value;

    /// When true, the executor injects the current `RuntimeState` (serialized)
    /// into `inputs` under the reserved key `__state__` before calling `execute`.
    fn requires_state_access(&self) -> bool {
        false
    }

    async fn execute(&self, inputs: Value) -> Result<ToolOutput, ToolError>;
}

/// Reserved input key used to inject state for tools with
/// `requires_state_access() == true`.
pub const STATE_INJECTION_KEY: &str = "__state__";
