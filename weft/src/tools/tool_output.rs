//! The result shape every tool invocation produces.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `error` is never produced by a tool's own `execute()` — only the tool
/// executor synthesizes it, on panic or `Err`, so reflection can tell "the
/// tool reported failure" apart from "the executor caught an exception".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Failed,
    Partial,
    Error,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolOutput {
    pub status: Option<ToolStatus>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub primary_result: Option<Value>,
    #[serde(default, rename = "type")]
    pub output_type: Option<String>,
    #[serde(default)]
    pub metrics: Option<Value>,
    #[serde(default)]
    pub raw_data: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl ToolOutput {
    pub fn success(output: Value) -> Self {
        Self {
            status: Some(ToolStatus::Success),
            output: Some(output),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(ToolStatus::Failed),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Built by the tool executor, never by a tool itself, when `execute()`
    /// panics or returns an `Err`.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Some(ToolStatus::Error),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_terminal_failure(&self) -> bool {
        matches!(self.status, Some(ToolStatus::Failed) | Some(ToolStatus::Error))
    }
}
