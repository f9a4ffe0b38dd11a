//! Resolves a planned tool call against the registry, runs it with its
//! resolved config, and records the result. Never raises: a panic or `Err`
//! from the tool becomes a `ToolOutput` of status `error`, and reflection
//! decides what happens next.

use serde_json::json;
use tracing::{error, instrument};

use crate::data_ref::replace_data_markers;
use crate::model_config::RuntimeMap;
use crate::state::{ActionEntry, ActionEntryKind, RuntimeState};
use crate::tools::{ToolOutput, STATE_INJECTION_KEY};

use super::types::{NodeContext, PlannerOutput};

/// Runs the tool named by `plan.tool_name`. Appends `{type: "tool_output", ...}`
/// to the current conversation before returning.
#[instrument(skip(state, ctx, plan), fields(tool_name = plan.tool_name.as_deref().unwrap_or("")))]
pub async fn run_tool(
    state: &mut RuntimeState,
    ctx: &NodeContext,
    plan: &PlannerOutput,
    runtime_map: Option<&RuntimeMap>,
) -> ToolOutput {
    let Some(tool_name) = plan.tool_name.clone() else {
        let output = ToolOutput::error("planner selected CALL_TOOL with no tool_name");
        record(state, &tool_name_or_unknown(plan), &output);
        return output;
    };

    let Some(tool) = ctx.tools.get(&tool_name) else {
        error!(tool_name, "tool not found in registry");
        let output = ToolOutput::error(format!("tool not found: {tool_name}"));
        record(state, &tool_name, &output);
        return output;
    };

    let _config = ctx.model_config.tool_config(&tool_name, runtime_map);

    let mut inputs = plan.tool_input.clone().unwrap_or_else(|| json!({}));
    inputs = replace_data_markers(&inputs, state);

    if tool.requires_state_access() {
        if let Ok(state_json) = serde_json::to_value(&*state) {
            if let serde_json::Value::Object(map) = &mut inputs {
                map.insert(STATE_INJECTION_KEY.to_string(), state_json);
            }
        }
    }

    let output = match tool.execute(inputs).await {
        Ok(output) => output,
        Err(e) => {
            error!(tool_name, error = %e, "tool execution raised");
            ToolOutput::error(e.to_string())
        }
    };

    record(state, &tool_name, &output);
    output
}

fn tool_name_or_unknown(plan: &PlannerOutput) -> String {
    plan.tool_name.clone().unwrap_or_else(|| "unknown".to_string())
}

fn record(state: &mut RuntimeState, tool_name: &str, output: &ToolOutput) {
    state.push_action_entry(
        ActionEntry::new(ActionEntryKind::ToolOutput, json!({ "data": output }))
            .with_tool(tool_name),
    );
}
