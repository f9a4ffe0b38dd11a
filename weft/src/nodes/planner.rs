//! The planner node: asks the LLM to choose the next tool call or declare the
//! task finished, given the full run-so-far context.

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::checkpoint::new_action_id;
use crate::data_ref::replace_data_markers;
use crate::llm::LlmError;
use crate::state::{ActionEntry, ActionEntryKind, ChatMessage, RuntimeState, TodoItem, TodoStatus};
use crate::tools::ToolCategory;

use super::types::{NodeContext, PlannerAction, PlannerOutput};

const TODO_GENERATOR: &str = "TodoGenerator";

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("planner llm call failed after one retry: {0}")]
    SchemaRetryExhausted(#[source] LlmError),
}

/// Runs the planner once: builds the prompt, calls the LLM (retrying exactly
/// once on schema failure), post-processes the decision, and records it.
#[instrument(skip(state, ctx), fields(task_goal_len = state.task_goal.len()))]
pub async fn run_planner(
    state: &mut RuntimeState,
    ctx: &NodeContext,
) -> Result<PlannerOutput, PlannerError> {
    let (system_prompt, user_prompt) = build_planner_prompt(state, ctx);

    let response = match ctx.llm.invoke(&user_prompt, &system_prompt).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "planner llm call failed, retrying once");
            ctx.llm
                .invoke(&user_prompt, &system_prompt)
                .await
                .map_err(PlannerError::SchemaRetryExhausted)?
        }
    };

    let mut output: PlannerOutput = match serde_json::from_value(response.value.clone()) {
        Ok(o) => o,
        Err(e) => {
            warn!(error = %e, "planner response did not match schema, retrying once");
            let retried = ctx
                .llm
                .invoke(&user_prompt, &system_prompt)
                .await
                .map_err(PlannerError::SchemaRetryExhausted)?;
            serde_json::from_value(retried.value)
                .map_err(|e| PlannerError::SchemaRetryExhausted(LlmError::SchemaMismatch(e.to_string())))?
        }
    };

    post_process(&mut output, state, ctx);

    state.push_action_entry(ActionEntry::new(
        ActionEntryKind::Plan,
        json!({
            "output": output,
            "action": output.action,
            "tool_name": output.tool_name,
            "tool_input": output.tool_input,
        }),
    ));

    Ok(output)
}

fn post_process(output: &mut PlannerOutput, state: &mut RuntimeState, ctx: &NodeContext) {
    if output.action == PlannerAction::Finish {
        if output.final_answer.take().is_some() {
            warn!("planner populated final_answer on FINISH; ignoring it");
        }
        output.title = None;
        return;
    }

    let Some(tool_name) = output.tool_name.clone() else {
        return;
    };

    let mut tool_input = output.tool_input.take().unwrap_or_else(|| json!({}));

    if tool_name == TODO_GENERATOR {
        autofill_todo_generator_inputs(&mut tool_input, ctx);
    }

    output.tool_input = Some(replace_data_markers(&tool_input, state));

    activate_matching_todo(&tool_name, state);
}

fn autofill_todo_generator_inputs(tool_input: &mut Value, ctx: &NodeContext) {
    if tool_input.get("available_tools").is_some() {
        return;
    }
    info!("auto-filling TodoGenerator.available_tools");
    let available: Vec<Value> = ctx
        .tools
        .list(Some(ToolCategory::Libs))
        .into_iter()
        .filter(|t| t.name != TODO_GENERATOR)
        .map(|t| serde_json::to_value(t).unwrap_or(Value::Null))
        .collect();
    if let Value::Object(map) = tool_input {
        map.insert("available_tools".to_string(), Value::Array(available));
    }
}

fn activate_matching_todo(tool_name: &str, state: &mut RuntimeState) {
    let snapshot = state.todo.clone();
    let now = Utc::now();
    for todo in state.todo.iter_mut() {
        if todo.status != TodoStatus::Pending {
            continue;
        }
        let matches = todo.suggested_tools.iter().any(|t| t == tool_name);
        if matches && todo.dependencies_met(&snapshot) {
            todo.status = TodoStatus::Processing;
            todo.started_at = Some(now);
            break;
        }
    }
}

/// Maximum chat turns (user+assistant pairs) shown in the prompt; older
/// turns are dropped, not summarized.
const MAX_CHAT_TURNS: usize = 10;

/// Truncation length for a single chat message or action-input value shown
/// inline in the prompt.
const PROMPT_SNIPPET_LEN: usize = 500;

fn build_planner_prompt(state: &mut RuntimeState, ctx: &NodeContext) -> (String, String) {
    let available_tools: Vec<_> = ctx
        .tools
        .list(None)
        .into_iter()
        .filter(|t| t.category != ToolCategory::Generator)
        .collect();

    let system_prompt = format!(
        "你是任务规划器。请根据当前状态选择下一步行动：调用工具（CALL_TOOL）或结束任务（FINISH）。\n\
         可用工具：\n{}",
        serde_json::to_string_pretty(&available_tools).unwrap_or_default()
    );

    let chat_history = format_chat_history(&state.chat_history, MAX_CHAT_TURNS);
    let action_history = format_action_history(state.action_history.last().map(Vec::as_slice).unwrap_or(&[]));
    let data_catalog = format_data_catalog_summary(&state.get_data_catalog());
    let todo_section = format_todo_section(&state.todo);
    let user_context = if state.user_context.is_empty() {
        String::new()
    } else {
        format!(
            "\n### 用户上下文\n{}\n",
            serde_json::to_string_pretty(&state.user_context).unwrap_or_default()
        )
    };

    let user_prompt = format!(
        "当前任务：\n{}\n{user_context}{chat_history}\n{action_history}\n{data_catalog}\n{todo_section}",
        state.task_goal,
    );

    (system_prompt, user_prompt)
}

/// Formats the most recent `max_turns` user/assistant pairs as Markdown,
/// truncating any single message at [`PROMPT_SNIPPET_LEN`] characters.
/// Empty history yields an empty string (no "### 历史对话记录" header).
fn format_chat_history(chat_history: &[ChatMessage], max_turns: usize) -> String {
    if chat_history.is_empty() {
        return String::new();
    }

    let recent = if chat_history.len() > max_turns * 2 {
        &chat_history[chat_history.len() - max_turns * 2..]
    } else {
        chat_history
    };

    let mut lines = vec!["### 历史对话记录\n".to_string()];
    for msg in recent {
        let content: String = if msg.content.chars().count() > PROMPT_SNIPPET_LEN {
            let truncated: String = msg.content.chars().take(PROMPT_SNIPPET_LEN - 3).collect();
            format!("{truncated}...")
        } else {
            msg.content.clone()
        };
        let label = match msg.role.as_str() {
            "user" => "用户".to_string(),
            "assistant" => "助手".to_string(),
            other => other.to_string(),
        };
        lines.push(format!("**{label}**: {content}"));
        lines.push(String::new());
    }
    lines.push("---\n".to_string());
    lines.join("\n")
}

/// Formats the current conversation's plan/tool_output/reflection entries
/// into a concise step-by-step history. Returns "尚未执行任何操作" (nothing
/// run yet) for an empty slice.
fn format_action_history(entries: &[ActionEntry]) -> String {
    if entries.is_empty() {
        return "尚未执行任何操作".to_string();
    }

    let mut lines = vec!["【执行历史摘要】".to_string()];
    let mut step = 0;
    let mut pending_plan: Option<&ActionEntry> = None;

    for entry in entries {
        match entry.kind {
            ActionEntryKind::Plan => {
                pending_plan = Some(entry);
            }
            ActionEntryKind::Reflection => {
                step += 1;
                let tool_name = pending_plan
                    .and_then(|p| p.data.get("tool_name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("思考");
                let status = entry.data.get("status").and_then(|v| v.as_str()).unwrap_or("unknown");
                let sufficient = entry.data.get("is_sufficient").and_then(|v| v.as_bool()).unwrap_or(false);
                let icon = match (status, sufficient) {
                    ("success", true) => "✓",
                    ("success", false) => "◐",
                    ("failed", _) | ("error", _) => "✗",
                    _ => "◯",
                };
                lines.push(format!("步骤{step}. {icon} {tool_name} - {status}"));
                if let Some(summary) = entry.data.get("summary").and_then(|v| v.as_str()) {
                    lines.push(format!("  结果: {summary}"));
                }
                pending_plan = None;
            }
            ActionEntryKind::ToolOutput | ActionEntryKind::FinalAnswer => {}
        }
    }

    lines.join("\n")
}

/// Turns [`crate::state::DataCatalog`] into the Markdown summary the planner
/// reads; empty when there is nothing preprocessed or executed yet.
fn format_data_catalog_summary(catalog: &crate::state::DataCatalog) -> String {
    let types = &catalog.available_data_types;
    let files = &types["preprocessed_files"];
    let history = &types["execution_history"];

    let doc_count = files["documents"]["count"].as_u64().unwrap_or(0);
    let table_count = files["tables"]["count"].as_u64().unwrap_or(0);
    let other_count = files["other_files"]["count"].as_u64().unwrap_or(0);
    let total_actions = history["total_actions"].as_u64().unwrap_or(0);

    if doc_count == 0 && table_count == 0 && other_count == 0 && total_actions == 0 {
        return String::new();
    }

    let mut lines = vec!["### 📂 数据目录".to_string()];
    if doc_count > 0 {
        lines.push(format!("**📄 文档** ({doc_count} 个)"));
    }
    if table_count > 0 {
        lines.push(format!("**📊 表格** ({table_count} 个)"));
    }
    if other_count > 0 {
        lines.push(format!("**📁 其他文件** ({other_count} 个)"));
    }
    if let Some(by_tool) = history["by_tool"].as_object() {
        if !by_tool.is_empty() {
            lines.push("**🔧 工具执行结果**:".to_string());
            for (tool, count) in by_tool {
                lines.push(format!("  - {tool}: {count} 次"));
            }
        }
    }
    lines.join("\n")
}

/// Formats the TODO list's progress, next executable task, and remaining
/// items, matching the originating prompt-builder's sections. Empty for no
/// TODOs.
fn format_todo_section(todo: &[TodoItem]) -> String {
    if todo.is_empty() {
        return String::new();
    }

    let total = todo.len();
    let completed = todo.iter().filter(|t| t.status == TodoStatus::Completed).count();
    let progress = if total > 0 { completed * 100 / total } else { 0 };

    let mut lines = vec![format!("### 任务清单（完成：{completed}/{total} | 进度：{progress}%）")];

    if let Some(next) = todo
        .iter()
        .find(|t| t.status == TodoStatus::Pending && t.dependencies_met(todo))
    {
        lines.push("**🎯 推荐执行任务：**".to_string());
        lines.push(format!("- **{}**: {}", next.id, next.task));
        if !next.suggested_tools.is_empty() {
            lines.push(format!("  - 建议工具：{}", next.suggested_tools.join(", ")));
        }
    }

    lines.push("**待完成任务：**".to_string());
    for t in todo.iter().filter(|t| matches!(t.status, TodoStatus::Pending | TodoStatus::Processing)) {
        let icon = if t.status == TodoStatus::Processing { "⚡" } else { "📌" };
        lines.push(format!("  - {icon} {}: {}", t.id, t.task));
    }

    lines.join("\n")
}

pub fn new_planner_action_id() -> String {
    new_action_id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockStructuredLlm;
    use crate::model_config::{ModelConfigResolver, StaticNodeConfigSource};
    use crate::tools::ToolRegistry;
    use std::sync::Arc;

    fn ctx(responses: Vec<Value>) -> NodeContext {
        NodeContext {
            llm: Arc::new(MockStructuredLlm::new(responses)),
            tools: Arc::new(ToolRegistry::new()),
            model_config: Arc::new(ModelConfigResolver::new(Box::new(StaticNodeConfigSource::new()))),
        }
    }

    /// **Scenario** (S1, happy path): a CALL_TOOL decision is recorded as a
    /// plan entry in the current conversation.
    #[tokio::test]
    async fn call_tool_decision_is_recorded_as_plan_entry() {
        let mut state = RuntimeState::new("summarize the report", None);
        let response = json!({
            "thought": "need to summarize",
            "action": "CALL_TOOL",
            "tool_name": "Summarizer",
            "tool_input": {"doc": "report.pdf"},
        });
        let context = ctx(vec![response]);
        let output = run_planner(&mut state, &context).await.unwrap();
        assert_eq!(output.tool_name.as_deref(), Some("Summarizer"));
        assert_eq!(state.action_history.last().unwrap().len(), 1);
    }

    /// **Scenario**: on FINISH, any stray `final_answer` the model produced is stripped.
    #[tokio::test]
    async fn finish_strips_stray_final_answer() {
        let mut state = RuntimeState::new("goal", None);
        let response = json!({
            "thought": "done",
            "action": "FINISH",
            "final_answer": "should be ignored",
            "title": "should also be ignored",
        });
        let context = ctx(vec![response]);
        let output = run_planner(&mut state, &context).await.unwrap();
        assert!(output.final_answer.is_none());
        assert!(output.title.is_none());
    }

    /// **Scenario**: a malformed first response is retried exactly once before erroring.
    #[tokio::test]
    async fn retries_once_on_schema_mismatch_then_succeeds() {
        let mut state = RuntimeState::new("goal", None);
        let bad = json!({"not": "a planner output"});
        let good = json!({"thought": "ok", "action": "FINISH"});
        let context = ctx(vec![bad, good]);
        let output = run_planner(&mut state, &context).await.unwrap();
        assert_eq!(output.action, PlannerAction::Finish);
    }

    /// **Scenario** (§4.5.1): the user prompt carries chat history, user
    /// context, a formatted action history, a data-catalog summary, and the
    /// TODO section — not just the bare goal and a raw TODO dump.
    #[test]
    fn prompt_includes_chat_history_context_catalog_and_todo() {
        let mut state = RuntimeState::new("summarize the report", None);
        state.chat_history.push(ChatMessage { role: "user".into(), content: "你好".into() });
        state.chat_history.push(ChatMessage { role: "assistant".into(), content: "好的".into() });
        state.user_context.insert("locale".into(), json!("zh-CN"));
        state.push_action_entry(ActionEntry::new(
            ActionEntryKind::Plan,
            json!({"tool_name": "Summarizer"}),
        ));
        state.push_action_entry(ActionEntry::new(
            ActionEntryKind::Reflection,
            json!({"status": "success", "is_sufficient": true, "summary": "done"}),
        ));
        state.preprocessed_files.documents.insert("report.pdf".into(), json!("content"));
        state.todo.push(TodoItem {
            id: "1".into(),
            task: "搜索资料".into(),
            status: TodoStatus::Pending,
            suggested_tools: vec!["GoogleSearch".into()],
            dependencies: vec![],
            retry: 0,
            max_retry: 3,
            timeout: 300,
            started_at: None,
            completed_at: None,
            failed_at: None,
            retry_after: None,
            error_history: vec![],
            execution_time: None,
            failure_reason: None,
        });

        let context = ctx(vec![]);
        let (_system, user_prompt) = build_planner_prompt(&mut state, &context);

        assert!(user_prompt.contains("历史对话记录"));
        assert!(user_prompt.contains("你好"));
        assert!(user_prompt.contains("用户上下文"));
        assert!(user_prompt.contains("locale"));
        assert!(user_prompt.contains("执行历史摘要"));
        assert!(user_prompt.contains("数据目录"));
        assert!(user_prompt.contains("任务清单"));
        assert!(user_prompt.contains("搜索资料"));
    }
}
