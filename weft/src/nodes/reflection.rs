//! Reflection: judges whether a tool's output satisfies the plan that
//! triggered it, advances the TODO list, and schedules retries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::checkpoint::new_action_id;
use crate::llm::LlmError;
use crate::state::{
    ActionEntry, ActionEntryKind, FullActionRecord, RuntimeState, TodoErrorEntry, TodoItem,
    TodoStatus,
};
use crate::tools::{ToolOutput, ToolStatus};

use super::types::{NodeContext, PlannerOutput, ReflectionOutput};

const TODO_GENERATOR: &str = "TodoGenerator";

/// Default tool-name -> keyword table used to decide which pending TODO a
/// tool result applies to, when a TODO names no `suggested_tools` of its own.
/// Caller-overridable via [`ReflectionConfig::tool_keywords`].
pub fn default_tool_keywords() -> HashMap<&'static str, &'static [&'static str]> {
    HashMap::from([
        ("TextGenerator", ["分析", "总结", "生成", "提取", "整合", "评估"].as_slice()),
        ("GoogleSearch", ["搜索", "查找", "检索", "查询"].as_slice()),
        ("knowledge_base", ["知识库", "查询", "检索", "文档"].as_slice()),
    ])
}

pub struct ReflectionConfig {
    pub tool_keywords: HashMap<&'static str, &'static [&'static str]>,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            tool_keywords: default_tool_keywords(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReflectionError {
    #[error("reflection llm call failed: {0}")]
    Llm(#[source] LlmError),
}

/// Runs reflection for one plan/tool_output pair. Always succeeds in writing
/// `full_action_data` and the action-history entry; the only failure mode is
/// the LLM call itself.
#[instrument(skip(state, ctx, config, plan, tool_output))]
pub async fn run_reflection(
    state: &mut RuntimeState,
    ctx: &NodeContext,
    config: &ReflectionConfig,
    plan: &PlannerOutput,
    tool_output: &ToolOutput,
) -> Result<ReflectionOutput, ReflectionError> {
    let (system_prompt, user_prompt) = build_reflection_prompt(plan, tool_output);

    let response = ctx
        .llm
        .invoke(&user_prompt, &system_prompt)
        .await
        .map_err(ReflectionError::Llm)?;
    let reflection: ReflectionOutput =
        serde_json::from_value(response.value).map_err(|e| ReflectionError::Llm(LlmError::SchemaMismatch(e.to_string())))?;

    let action_id = new_action_id();
    state.full_action_data.insert(
        action_id.clone(),
        FullActionRecord {
            tool_name: plan.tool_name.clone(),
            status: tool_output.status.map(|s| format!("{s:?}").to_lowercase()),
            timestamp: Some(Utc::now()),
            plan: serde_json::to_value(plan).ok(),
            tool_output: serde_json::to_value(tool_output).ok(),
            reflection: serde_json::to_value(&reflection).ok(),
        },
    );

    state.push_action_entry(ActionEntry::new(
        ActionEntryKind::Reflection,
        json!({
            "conclusion": reflection.conclusion,
            "summary": reflection.summary,
            "impact": reflection.impact,
            "is_finished": reflection.is_finished,
            "is_sufficient": reflection.is_sufficient,
            "key_findings": reflection.key_findings,
            "action_id": action_id,
        }),
    ));

    if plan.tool_name.as_deref() == Some(TODO_GENERATOR) {
        if let Some(todo_list) = tool_output.output.clone() {
            if let Ok(todos) = serde_json::from_value::<Vec<TodoItem>>(todo_list) {
                info!(count = todos.len(), "TodoGenerator replaced the TODO list");
                state.todo = todos;
            }
        }
    }

    advance_matching_todos(state, config, plan, tool_output, &reflection);

    state.invalidate_data_catalog();

    Ok(reflection)
}

fn advance_matching_todos(
    state: &mut RuntimeState,
    config: &ReflectionConfig,
    plan: &PlannerOutput,
    tool_output: &ToolOutput,
    reflection: &ReflectionOutput,
) {
    let Some(tool_name) = plan.tool_name.as_deref() else {
        return;
    };
    let now = Utc::now();

    for todo in state.todo.iter_mut() {
        if todo.status != TodoStatus::Processing {
            continue;
        }
        if !todo_matches_tool(todo, tool_name, &config.tool_keywords) {
            continue;
        }

        let succeeded = tool_output.status == Some(ToolStatus::Success);
        let keywords_present = task_keywords_present(todo, tool_name, plan, tool_output, reflection);

        if succeeded && reflection.is_sufficient && keywords_present {
            todo.status = TodoStatus::Completed;
            todo.completed_at = Some(now);
            if let Some(started) = todo.started_at {
                todo.execution_time = Some((now - started).num_milliseconds() as f64 / 1000.0);
            }
        } else if !succeeded {
            todo.retry += 1;
            todo.error_history.push(TodoErrorEntry {
                timestamp: now,
                tool: tool_name.to_string(),
                status: format!("{:?}", tool_output.status).to_lowercase(),
                error: tool_output.message.clone().unwrap_or_default(),
                retry_count: todo.retry,
                execution_time: 0.0,
            });

            let timed_out = todo
                .started_at
                .map(|s| (now - s).num_seconds() as u64 > todo.timeout)
                .unwrap_or(false);

            if timed_out {
                todo.status = TodoStatus::Failed;
                todo.failed_at = Some(now);
                todo.failure_reason = Some("超时".to_string());
            } else if todo.retry > todo.max_retry {
                todo.status = TodoStatus::Failed;
                todo.failed_at = Some(now);
                todo.failure_reason = Some(format!("重试{}次后仍失败", todo.retry));
            } else {
                let backoff = retry_backoff_seconds(todo.retry, tool_output.message.as_deref().unwrap_or(""));
                todo.retry_after = Some(now + chrono::Duration::seconds(backoff as i64));
                todo.status = TodoStatus::Pending;
                warn!(todo_id = %todo.id, retry = todo.retry, backoff, "scheduling TODO retry");
            }
        }
    }
}

fn todo_matches_tool(todo: &TodoItem, tool_name: &str, keywords: &HashMap<&'static str, &'static [&'static str]>) -> bool {
    if todo.suggested_tools.iter().any(|t| t == tool_name) {
        return true;
    }
    keywords
        .get(tool_name)
        .map(|kws| kws.iter().any(|kw| todo.task.contains(kw)))
        .unwrap_or(false)
}

fn task_keywords_present(
    todo: &TodoItem,
    tool_name: &str,
    plan: &PlannerOutput,
    tool_output: &ToolOutput,
    reflection: &ReflectionOutput,
) -> bool {
    // A TODO with its own suggested_tools match is already a strong enough
    // signal; otherwise require the task description to show up verbatim in
    // what the tool actually produced.
    if todo.suggested_tools.iter().any(|t| t == tool_name) {
        return true;
    }
    let haystack = format!(
        "{}{}{}",
        plan.tool_input.as_ref().map(|v| v.to_string()).unwrap_or_default(),
        tool_output.output.as_ref().map(|v| v.to_string()).unwrap_or_default(),
        reflection.summary,
    );
    haystack.contains(&todo.task)
}

fn retry_backoff_seconds(retry: u32, error_message: &str) -> u64 {
    let base = 2u64.saturating_pow(retry.saturating_sub(1)).min(8);
    let lower = error_message.to_lowercase();
    if lower.contains("rate limit") || error_message.contains("too many requests") {
        base * 2
    } else if lower.contains("network") || lower.contains("connection") {
        1
    } else {
        base
    }
}

fn build_reflection_prompt(plan: &PlannerOutput, tool_output: &ToolOutput) -> (String, String) {
    let system_prompt = "你是反思节点。请评估工具执行结果是否满足计划预期，并给出结论。".to_string();
    let user_prompt = format!(
        "计划：\n{}\n\n工具输出：\n{}\n",
        serde_json::to_string_pretty(plan).unwrap_or_default(),
        serde_json::to_string_pretty(tool_output).unwrap_or_default(),
    );
    (system_prompt, user_prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockStructuredLlm;
    use crate::model_config::{ModelConfigResolver, StaticNodeConfigSource};
    use crate::nodes::types::PlannerAction;
    use crate::tools::ToolRegistry;
    use std::sync::Arc;

    fn ctx(responses: Vec<serde_json::Value>) -> NodeContext {
        NodeContext {
            llm: Arc::new(MockStructuredLlm::new(responses)),
            tools: Arc::new(ToolRegistry::new()),
            model_config: Arc::new(ModelConfigResolver::new(Box::new(StaticNodeConfigSource::new()))),
        }
    }

    fn plan_for(tool_name: &str) -> PlannerOutput {
        PlannerOutput {
            thought: "t".into(),
            action: PlannerAction::CallTool,
            tool_name: Some(tool_name.to_string()),
            tool_input: Some(json!({})),
            expected_outcome: None,
            output_guidance: None,
            final_answer: None,
            title: None,
        }
    }

    /// **Scenario**: a successful reflection records a full_action_data entry
    /// keyed by a fresh action_id and invalidates the data catalog.
    #[tokio::test]
    async fn records_full_action_data_and_invalidates_catalog() {
        let mut state = RuntimeState::new("goal", None);
        state.get_data_catalog();
        assert!(state.get_data_catalog().available_data_types.is_object());

        let context = ctx(vec![json!({
            "conclusion": "done",
            "summary": "summarized the doc",
            "impact": "low",
            "is_finished": false,
            "is_sufficient": true,
            "key_findings": [],
        })]);
        let plan = plan_for("Summarizer");
        let output = ToolOutput::success(json!({"text": "..."}));
        let config = ReflectionConfig::default();

        run_reflection(&mut state, &context, &config, &plan, &output).await.unwrap();
        assert_eq!(state.full_action_data.len(), 1);
    }

    /// **Scenario** (S6, TODO retry backoff): a failed tool run on a processing
    /// TODO increments retry and schedules a retry_after, reverting to pending.
    #[tokio::test]
    async fn failed_tool_schedules_todo_retry() {
        let mut state = RuntimeState::new("goal", None);
        state.todo.push(TodoItem {
            id: "t1".into(),
            task: "fetch data".into(),
            status: TodoStatus::Processing,
            suggested_tools: vec!["Fetcher".into()],
            dependencies: vec![],
            retry: 0,
            max_retry: 3,
            timeout: 300,
            started_at: Some(Utc::now()),
            completed_at: None,
            failed_at: None,
            retry_after: None,
            error_history: vec![],
            execution_time: None,
            failure_reason: None,
        });

        let context = ctx(vec![json!({
            "conclusion": "failed",
            "summary": "fetch failed",
            "impact": "high",
            "is_finished": false,
            "is_sufficient": false,
            "key_findings": [],
        })]);
        let plan = plan_for("Fetcher");
        let output = ToolOutput::failed("connection reset");
        let config = ReflectionConfig::default();

        run_reflection(&mut state, &context, &config, &plan, &output).await.unwrap();

        let todo = &state.todo[0];
        assert_eq!(todo.retry, 1);
        assert_eq!(todo.status, TodoStatus::Pending);
        assert!(todo.retry_after.is_some());
    }

    /// **Scenario**: exceeding max_retry marks the TODO failed with the
    /// exhausted-retries failure reason.
    #[tokio::test]
    async fn exhausted_retries_marks_todo_failed() {
        let mut state = RuntimeState::new("goal", None);
        state.todo.push(TodoItem {
            id: "t1".into(),
            task: "fetch data".into(),
            status: TodoStatus::Processing,
            suggested_tools: vec!["Fetcher".into()],
            dependencies: vec![],
            retry: 3,
            max_retry: 3,
            timeout: 300,
            started_at: Some(Utc::now()),
            completed_at: None,
            failed_at: None,
            retry_after: None,
            error_history: vec![],
            execution_time: None,
            failure_reason: None,
        });

        let context = ctx(vec![json!({
            "conclusion": "failed",
            "summary": "fetch failed again",
            "impact": "high",
            "is_finished": false,
            "is_sufficient": false,
            "key_findings": [],
        })]);
        let plan = plan_for("Fetcher");
        let output = ToolOutput::failed("some error");
        let config = ReflectionConfig::default();

        run_reflection(&mut state, &context, &config, &plan, &output).await.unwrap();

        let todo = &state.todo[0];
        assert_eq!(todo.status, TodoStatus::Failed);
        assert_eq!(todo.failure_reason.as_deref(), Some("重试4次后仍失败"));
    }

    #[test]
    fn backoff_doubles_on_rate_limit_and_fixes_at_one_on_network() {
        assert_eq!(retry_backoff_seconds(1, "rate limit exceeded"), 2);
        assert_eq!(retry_backoff_seconds(1, "network error"), 1);
        assert_eq!(retry_backoff_seconds(4, "unrelated failure"), 8);
    }
}
