//! The structured-output schemas node handlers exchange with the LLM, plus
//! the collaborators every handler is given instead of doing I/O itself.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::StructuredLlm;
use crate::model_config::ModelConfigResolver;
use crate::tools::ToolRegistry;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OutputGuidance {
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub format_requirements: Option<String>,
    #[serde(default)]
    pub quality_requirements: Option<String>,
    #[serde(default)]
    pub custom_prompt: Option<String>,
    #[serde(default)]
    pub structure_template: Option<String>,
    #[serde(default)]
    pub emphasized_action_ids: Vec<String>,
    #[serde(default)]
    pub deemphasized_action_ids: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlannerAction {
    CallTool,
    Finish,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PlannerOutput {
    pub thought: String,
    pub action: PlannerAction,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<Value>,
    #[serde(default)]
    pub expected_outcome: Option<String>,
    #[serde(default)]
    pub output_guidance: Option<OutputGuidance>,
    /// Stripped on `FINISH` before this value is used downstream; the LLM
    /// should never have populated it, but older prompts sometimes did.
    #[serde(default)]
    pub final_answer: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReflectionOutput {
    pub conclusion: String,
    pub summary: String,
    pub impact: String,
    pub is_finished: bool,
    pub is_sufficient: bool,
    #[serde(default)]
    pub key_findings: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OutputToolDecision {
    pub tool_name: String,
    pub tool_input: Value,
}

/// Handlers get their LLM, tool registry, and model resolver injected; they
/// perform no I/O beyond what these collaborators do.
pub struct NodeContext {
    pub llm: Arc<dyn StructuredLlm>,
    pub tools: Arc<ToolRegistry>,
    pub model_config: Arc<ModelConfigResolver>,
}
