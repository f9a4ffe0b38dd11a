//! Output selector: picks which `generator`-category tool renders the final
//! answer, given the planner's `output_guidance`.

use serde_json::json;
use tracing::{info, warn};

use crate::state::RuntimeState;
use crate::tools::ToolCategory;

use super::types::{NodeContext, OutputGuidance, OutputToolDecision};

const DEFAULT_GENERATOR: &str = "TextGenerator";

/// Asks the LLM to choose a generator tool; falls back deterministically
/// (`TextGenerator`, else the first generator tool by ascending name) on LLM
/// failure or an unparseable/unknown selection.
pub async fn select_output_tool(
    state: &RuntimeState,
    ctx: &NodeContext,
    output_guidance: Option<&OutputGuidance>,
) -> OutputToolDecision {
    let generators = ctx.tools.generator_tools();

    let (system_prompt, user_prompt) = build_prompt(state, &generators, output_guidance);

    let llm_choice = ctx.llm.invoke(&user_prompt, &system_prompt).await.ok().and_then(|resp| {
        resp.value.get("tool_name").and_then(|v| v.as_str()).map(|s| s.to_string())
    });

    let tool_name = match llm_choice {
        Some(name) if generators.iter().any(|g| g.name == name) => name,
        Some(name) => {
            warn!(requested = name, "output selector chose an unregistered tool, falling back");
            fallback_generator(&generators)
        }
        None => {
            warn!("output selector llm call failed or was unparseable, falling back");
            fallback_generator(&generators)
        }
    };

    info!(tool_name, "output tool selected");

    let tool_input = json!({
        "state": state,
        "output_guidance": output_guidance,
    });

    OutputToolDecision { tool_name, tool_input }
}

fn fallback_generator(generators: &[crate::tools::ToolDescriptor]) -> String {
    if generators.iter().any(|g| g.name == DEFAULT_GENERATOR) {
        return DEFAULT_GENERATOR.to_string();
    }
    generators
        .first()
        .map(|g| g.name.clone())
        .unwrap_or_else(|| DEFAULT_GENERATOR.to_string())
}

fn build_prompt(
    state: &RuntimeState,
    generators: &[crate::tools::ToolDescriptor],
    output_guidance: Option<&OutputGuidance>,
) -> (String, String) {
    let system_prompt = format!(
        "请从以下输出工具中选择一个来呈现最终答案：\n{}",
        serde_json::to_string_pretty(generators).unwrap_or_default()
    );
    let user_prompt = format!(
        "原始任务：\n{}\n\n输出指引：\n{}\n",
        state.original_task_goal(),
        serde_json::to_string_pretty(&output_guidance).unwrap_or_default(),
    );
    (system_prompt, user_prompt)
}
