//! `GraphExecutor`: the main loop (SPEC §4.6) driving one task's
//! planner → tool → reflection → output cycle to completion, checkpointing
//! after every hop.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::data_ref::replace_data_markers;
use crate::error::{ExecutorError, NodeError, WeftError};
use crate::graph::{select_edge, Graph, NodeKind, NodeOutputShape, END};
use crate::nodes::{
    run_planner, run_reflection, run_tool, select_output_tool, NodeContext, PlannerAction,
    PlannerOutput, ReflectionConfig,
};
use crate::state::{ActionEntry, ActionEntryKind, ActionStep, ChatMessage, LogType, RuntimeState};
use crate::tools::ToolOutput;

use super::retry::run_output_tool_with_recovery;

const DEFAULT_OUTPUT_MAX_ATTEMPTS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

pub struct TaskOutcome {
    pub status: TaskStatus,
    pub output_data: Option<Value>,
    pub state: RuntimeState,
    pub action_steps: Vec<ActionStep>,
}

/// Drives one task's graph traversal from `planner` to `END`. One executor
/// instance is built per task; nothing here is shared mutable state across
/// tasks beyond the `Arc`-shared collaborators in `ctx`.
pub struct GraphExecutor {
    graph: Graph,
    checkpoint: std::sync::Arc<CheckpointStore>,
    ctx: NodeContext,
    reflection_config: ReflectionConfig,
    task_id: String,
    user_id: String,
    session_id: String,
}

impl GraphExecutor {
    pub fn new(
        graph: Graph,
        checkpoint: std::sync::Arc<CheckpointStore>,
        ctx: NodeContext,
        task_id: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            graph,
            checkpoint,
            ctx,
            reflection_config: ReflectionConfig::default(),
            task_id: task_id.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }

    pub fn with_reflection_config(mut self, config: ReflectionConfig) -> Self {
        self.reflection_config = config;
        self
    }

    /// Runs `state` to completion. `cancel` is polled between node hops; once
    /// it returns `true` the loop terminates cleanly with `TaskStatus::Cancelled`
    /// after one final save, per §5's "checked between nodes" cancellation model.
    pub async fn run(
        &self,
        mut state: RuntimeState,
        cancel: Option<&(dyn Fn() -> bool + Send + Sync)>,
    ) -> Result<TaskOutcome, WeftError> {
        state.normalize_action_history();

        let existing_steps = self
            .checkpoint
            .metadata(&self.task_id, &self.user_id)
            .map_err(WeftError::Checkpoint)?
            .map(|m| m.total_steps)
            .unwrap_or(0);
        let mut step = existing_steps + 1;

        let mut current = crate::graph::PLANNER.to_string();
        let mut current_plan: Option<PlannerOutput> = None;
        let mut last_tool_output: Option<ToolOutput> = None;
        let mut last_node_was_output_tool = false;
        let mut already_tried_output_tools: Vec<String> = Vec::new();
        let mut action_steps: Vec<ActionStep> = Vec::new();

        loop {
            if current == END {
                break;
            }

            if let Some(cancel) = cancel {
                if cancel() {
                    info!(task_id = %self.task_id, "task cancelled between node hops");
                    self.checkpoint.save(&self.task_id, &self.user_id, &self.session_id, &state);
                    return Ok(TaskOutcome {
                        status: TaskStatus::Cancelled,
                        output_data: None,
                        state,
                        action_steps,
                    });
                }
            }

            let node = self.graph.node(&current).ok_or_else(|| {
                WeftError::Executor(ExecutorError::NoMatchingEdge {
                    node: current.clone(),
                    output: "node not present in graph".to_string(),
                })
            })?;

            let todo_before = serde_json::to_value(&state.todo).unwrap_or(Value::Null);
            let node_type;
            let next: Option<String>;

            match node.kind {
                NodeKind::Router => match node.callable_path.as_str() {
                    "nodes::planner" => {
                        node_type = "planner";
                        let plan = run_planner(&mut state, &self.ctx)
                            .await
                            .map_err(|e| self.node_error(&current, NodeError::Llm(e.to_string())))?;

                        action_steps.push(self.step_row(step, LogType::Planner, json!({ "plan": &plan })));
                        self.save_step(step, node_type, &serde_json::to_value(&plan).unwrap_or(Value::Null), plan.tool_name.as_deref());

                        let shape = NodeOutputShape::Planner {
                            action: match plan.action {
                                PlannerAction::CallTool => "CALL_TOOL",
                                PlannerAction::Finish => "FINISH",
                            },
                            tool_name: plan.tool_name.as_deref(),
                        };
                        next = select_edge(&self.graph, &current, &shape);
                        current_plan = Some(plan);
                    }
                    "nodes::reflection" => {
                        node_type = "reflection";
                        let plan = current_plan.clone().ok_or_else(|| {
                            self.navigation_error(&current, "reflection reached with no current plan")
                        })?;
                        let tool_output = last_tool_output.clone().ok_or_else(|| {
                            self.navigation_error(&current, "reflection reached with no tool output")
                        })?;

                        let reflection = run_reflection(&mut state, &self.ctx, &self.reflection_config, &plan, &tool_output)
                            .await
                            .map_err(|e| self.node_error(&current, NodeError::Llm(e.to_string())))?;

                        action_steps.push(self.step_row(step, LogType::Reflection, json!({ "reflection": &reflection })));
                        let reflection_value = serde_json::to_value(&reflection).unwrap_or(Value::Null);
                        self.save_step(step, node_type, &reflection_value, plan.tool_name.as_deref());

                        // The raw `ReflectionOutput` always carries `is_finished`
                        // (true or false), so the generic "key present and
                        // non-null" edge rule can't distinguish the two — derive
                        // a presence-only routing map instead: `finished` is
                        // present only when the task is actually done, so graphs
                        // key their "proceed to output" edge on it and fall back
                        // unconditionally to the planner otherwise.
                        let routing = if reflection.is_finished {
                            json!({ "finished": true })
                        } else {
                            json!({})
                        };
                        next = select_edge(&self.graph, &current, &NodeOutputShape::Map(&routing));
                    }
                    "nodes::output" => {
                        node_type = "output";
                        let guidance = current_plan.as_ref().and_then(|p| p.output_guidance.clone());
                        let decision = select_output_tool(&state, &self.ctx, guidance.as_ref()).await;
                        state.output_tool_input = Some(decision.tool_input.clone());

                        action_steps.push(self.step_row(
                            step,
                            LogType::ToolCall,
                            json!({ "output_tool_selected": decision.tool_name }),
                        ));
                        self.save_step(step, node_type, &json!({ "tool_name": decision.tool_name }), Some(&decision.tool_name));

                        next = select_edge(
                            &self.graph,
                            &current,
                            &NodeOutputShape::Output { tool_name: &decision.tool_name },
                        );
                    }
                    other => {
                        return Err(self.node_error(&current, NodeError::ToolNotFound(other.to_string())));
                    }
                },
                NodeKind::Tool | NodeKind::Llm => {
                    let tool_name = node
                        .callable_path
                        .strip_prefix("tool:")
                        .unwrap_or(&node.callable_path)
                        .to_string();

                    if node.is_output_tool() && state.output_tool_input.is_some() {
                        node_type = "output_tool";
                        let inputs = replace_data_markers(
                            &state.output_tool_input.clone().unwrap_or(json!({})),
                            &state,
                        );
                        action_steps.push(self.step_row(
                            step,
                            LogType::ToolCall,
                            json!({ "tool_name": tool_name, "inputs": &inputs }),
                        ));

                        let max_attempts = node
                            .config
                            .get("max_attempts")
                            .and_then(|v| v.as_u64())
                            .map(|v| v as u32)
                            .unwrap_or(DEFAULT_OUTPUT_MAX_ATTEMPTS);

                        match run_output_tool_with_recovery(
                            &tool_name,
                            &inputs,
                            &self.ctx,
                            max_attempts,
                            &mut already_tried_output_tools,
                        )
                        .await
                        {
                            Ok(outcome) => {
                                state.retry_history.extend(outcome.retry_history.clone());
                                action_steps.push(self.step_row(
                                    step,
                                    LogType::ToolResult,
                                    json!({
                                        "tool_name": outcome.tool_name,
                                        "output": &outcome.output,
                                        "retry_attempt": outcome.retry_history.len(),
                                        "error_recovered": !outcome.retry_history.is_empty(),
                                        "is_output_tool": true,
                                    }),
                                ));
                                self.save_step(step, node_type, &serde_json::to_value(&outcome.output).unwrap_or(Value::Null), Some(&outcome.tool_name));

                                last_tool_output = Some(outcome.output);
                                last_node_was_output_tool = true;
                                next = Some(END.to_string());
                            }
                            Err(failure) => {
                                warn!(task_id = %self.task_id, tool_name, "output tool exhausted retries and fallbacks");
                                state.retry_history.extend(failure.retry_history.clone());
                                state.error_details = Some(failure.error_details.clone());
                                self.checkpoint.save(&self.task_id, &self.user_id, &self.session_id, &state);
                                return Err(WeftError::Executor(ExecutorError::OutputToolExhausted(
                                    failure.error_details.to_string(),
                                )));
                            }
                        }
                    } else {
                        node_type = "call_tool";
                        let plan = current_plan.clone().ok_or_else(|| {
                            self.navigation_error(&current, "tool node reached with no current plan")
                        })?;

                        action_steps.push(self.step_row(
                            step,
                            LogType::ToolCall,
                            json!({ "tool_name": tool_name, "tool_input": &plan.tool_input }),
                        ));

                        let output = run_tool(&mut state, &self.ctx, &plan, None).await;

                        action_steps.push(self.step_row(step, LogType::ToolResult, json!({ "output": &output })));
                        self.save_step(step, node_type, &serde_json::to_value(&output).unwrap_or(Value::Null), Some(&tool_name));

                        let output_value = serde_json::to_value(&output).unwrap_or(Value::Null);
                        last_tool_output = Some(output);
                        last_node_was_output_tool = false;
                        next = select_edge(&self.graph, &current, &NodeOutputShape::Map(&output_value));
                    }
                }
            }

            let todo_after = serde_json::to_value(&state.todo).unwrap_or(Value::Null);
            if todo_before != todo_after {
                action_steps.push(self.step_row(step, LogType::TodoUpdate, json!({ "todo": &state.todo })));
            }

            self.checkpoint.save(&self.task_id, &self.user_id, &self.session_id, &state);
            step += 1;

            current = next.ok_or_else(|| {
                self.navigation_error(&current, "no edge matched node output")
            })?;
        }

        let output_data = self.finalize_task(&mut state, last_tool_output.as_ref(), last_node_was_output_tool, step);
        action_steps.push(self.step_row(step, LogType::FinalAnswer, output_data.clone()));
        self.checkpoint.save(&self.task_id, &self.user_id, &self.session_id, &state);

        Ok(TaskOutcome {
            status: TaskStatus::Completed,
            output_data: Some(output_data),
            state,
            action_steps,
        })
    }

    fn finalize_task(
        &self,
        state: &mut RuntimeState,
        last_output: Option<&ToolOutput>,
        last_was_output_tool: bool,
        _step: u64,
    ) -> Value {
        let (final_answer, title) = if last_was_output_tool {
            last_output.map(extract_final_answer_and_title).unwrap_or((None, None))
        } else {
            (None, None)
        };

        let already_finalized = state
            .action_history
            .last()
            .and_then(|conversation| conversation.last())
            .map(|entry| entry.kind == ActionEntryKind::FinalAnswer)
            .unwrap_or(false);

        if let (Some(answer), Some(title)) = (&final_answer, &title) {
            if !already_finalized {
                state.push_action_entry(ActionEntry::new(
                    ActionEntryKind::FinalAnswer,
                    json!({ "output": answer, "title": title }),
                ));
                state.chat_history.push(ChatMessage {
                    role: "assistant".to_string(),
                    content: answer.clone(),
                });
            }
        }

        json!({
            "final_conclusion": final_answer,
            "task_goal": state.original_task_goal(),
            "title": title,
            "action_history": state.action_history,
            "retry_history": if state.retry_history.is_empty() { Value::Null } else {
                serde_json::to_value(&state.retry_history).unwrap_or(Value::Null)
            },
            "error_details": state.error_details.clone().unwrap_or(Value::Null),
        })
    }

    fn step_row(&self, step: u64, log_type: LogType, details: Value) -> ActionStep {
        ActionStep {
            task_id: self.task_id.clone(),
            step_order: step,
            log_type,
            details,
            created_at: Utc::now(),
        }
    }

    fn save_step(&self, step: u64, node_type: &str, output: &Value, tool_name: Option<&str>) {
        if let Err(e) = self.checkpoint.save_step(&self.task_id, &self.user_id, &self.session_id, step, node_type, output, tool_name) {
            warn!(task_id = %self.task_id, step, error = %e, "failed to write step artifact");
        }
    }

    fn node_error(&self, node: &str, source: NodeError) -> WeftError {
        WeftError::Executor(ExecutorError::Node {
            node: node.to_string(),
            source,
        })
    }

    fn navigation_error(&self, node: &str, reason: &str) -> WeftError {
        WeftError::Executor(ExecutorError::NoMatchingEdge {
            node: node.to_string(),
            output: reason.to_string(),
        })
    }
}

/// Output tools surface their rendered answer as `primary_result` (falling
/// back to `message`) and an optional `title` under `metadata.title`.
fn extract_final_answer_and_title(output: &ToolOutput) -> (Option<String>, Option<String>) {
    let final_answer = output
        .primary_result
        .as_ref()
        .and_then(|v| v.as_str().map(|s| s.to_string()).or_else(|| Some(v.to_string())))
        .or_else(|| output.message.clone());

    let title = output
        .metadata
        .as_ref()
        .and_then(|m| m.get("title"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    (final_answer, title)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointStore;
    use crate::graph::{Edge, GraphBuilder, Node, PLANNER};
    use crate::llm::MockStructuredLlm;
    use crate::model_config::{ModelConfigResolver, StaticNodeConfigSource};
    use crate::tools::{Tool, ToolCategory, ToolError, ToolRegistry};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Summarizer;
    #[async_trait]
    impl Tool for Summarizer {
        fn name(&self) -> &str {
            "Summarizer"
        }
        fn description(&self) -> &str {
            "summarizes"
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::Libs
        }
        fn input_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, inputs: Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::success(json!({ "echo": inputs })))
        }
    }

    struct TextGenerator;
    #[async_trait]
    impl Tool for TextGenerator {
        fn name(&self) -> &str {
            "TextGenerator"
        }
        fn description(&self) -> &str {
            "renders the final answer"
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::Generator
        }
        fn input_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, _inputs: Value) -> Result<ToolOutput, ToolError> {
            let mut output = ToolOutput::success(json!("the final text"));
            output.primary_result = Some(json!("the conclusion"));
            output.metadata = Some(json!({ "title": "Report" }));
            Ok(output)
        }
    }

    fn happy_path_graph() -> Graph {
        GraphBuilder::new("happy_path")
            .add_node(Node::new(PLANNER, NodeKind::Router, "nodes::planner"))
            .add_node(Node::new("summarizer", NodeKind::Tool, "tool:Summarizer"))
            .add_node(Node::new("reflection", NodeKind::Router, "nodes::reflection"))
            .add_node(Node::new("output", NodeKind::Router, "nodes::output"))
            .add_node(
                Node::new("text_generator", NodeKind::Tool, "tool:TextGenerator")
                    .with_config("is_output_tool", json!(true)),
            )
            .add_edge(Edge::conditional(PLANNER, "summarizer", "CALL_TOOL:Summarizer"))
            .add_edge(Edge::conditional(PLANNER, "output", "FINISH"))
            .add_edge(Edge::unconditional("summarizer", "reflection"))
            .add_edge(Edge::conditional("reflection", "output", "finished"))
            .add_edge(Edge::unconditional("reflection", PLANNER))
            .add_edge(Edge::conditional("output", "text_generator", "OUTPUT:TextGenerator"))
            .add_edge(Edge::unconditional("text_generator", END))
            .build()
            .unwrap()
    }

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new();
        r.register(Arc::new(Summarizer));
        r.register(Arc::new(TextGenerator));
        r
    }

    fn ctx(responses: Vec<Value>) -> NodeContext {
        NodeContext {
            llm: Arc::new(MockStructuredLlm::new(responses)),
            tools: Arc::new(registry()),
            model_config: Arc::new(ModelConfigResolver::new(Box::new(StaticNodeConfigSource::new()))),
        }
    }

    fn store() -> (tempfile::TempDir, Arc<CheckpointStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path()).unwrap());
        (dir, store)
    }

    /// **Scenario** (S1, happy path): planner calls a tool, reflection decides
    /// it's finished, output selector picks TextGenerator, and the task
    /// completes with a persisted final_conclusion/title.
    #[tokio::test]
    async fn happy_path_completes_with_final_answer() {
        let (_dir, checkpoint) = store();
        let context = ctx(vec![
            json!({"thought": "summarize", "action": "CALL_TOOL", "tool_name": "Summarizer", "tool_input": {"doc": "a"}}),
            json!({"conclusion": "done", "summary": "ok", "impact": "low", "is_finished": true, "is_sufficient": true, "key_findings": []}),
            json!({"tool_name": "TextGenerator"}),
        ]);
        let executor = GraphExecutor::new(happy_path_graph(), checkpoint, context, "task-1", "user-1", "session-1");
        let state = RuntimeState::new("summarize the report", None);

        let outcome = executor.run(state, None).await.unwrap();

        assert_eq!(outcome.status, TaskStatus::Completed);
        let output_data = outcome.output_data.unwrap();
        assert_eq!(output_data["final_conclusion"], json!("the conclusion"));
        assert_eq!(output_data["title"], json!("Report"));
        assert_eq!(outcome.state.chat_history.len(), 1);
    }

    /// **Scenario** (§8 idempotence): re-running `finalize_task` on a state
    /// that already carries a `FinalAnswer` entry is a no-op — no duplicate
    /// action-history entry or chat message is appended.
    #[tokio::test]
    async fn finalize_task_on_already_completed_state_is_a_no_op() {
        let (_dir, checkpoint) = store();
        let context = ctx(vec![]);
        let executor = GraphExecutor::new(happy_path_graph(), checkpoint, context, "task-4", "user-1", "session-1");
        let mut state = RuntimeState::new("summarize the report", None);

        let mut output = ToolOutput::success(json!("the final text"));
        output.primary_result = Some(json!("the conclusion"));
        output.metadata = Some(json!({ "title": "Report" }));

        executor.finalize_task(&mut state, Some(&output), true, 1);
        assert_eq!(state.chat_history.len(), 1);
        let entries_after_first = state.action_history.last().unwrap().len();

        executor.finalize_task(&mut state, Some(&output), true, 2);
        assert_eq!(state.chat_history.len(), 1);
        assert_eq!(state.action_history.last().unwrap().len(), entries_after_first);
    }

    /// **Scenario** (S4, crash & resume): the next step number after a prior
    /// run picks up from `total_steps + 1`, not from 1.
    #[tokio::test]
    async fn resumed_run_continues_step_numbering() {
        let (_dir, checkpoint) = store();
        checkpoint.create_workflow_directory("task-2", "user-1", "session-1").unwrap();
        checkpoint
            .save_step("task-2", "user-1", "session-1", 1, "planner", &json!({}), None)
            .unwrap();
        checkpoint
            .save_step("task-2", "user-1", "session-1", 2, "call_tool", &json!({}), Some("Summarizer"))
            .unwrap();

        let context = ctx(vec![
            json!({"thought": "done", "action": "FINISH"}),
            json!({"tool_name": "TextGenerator"}),
        ]);
        let graph = GraphBuilder::new("g")
            .add_node(Node::new(PLANNER, NodeKind::Router, "nodes::planner"))
            .add_node(Node::new("output", NodeKind::Router, "nodes::output"))
            .add_node(
                Node::new("text_generator", NodeKind::Tool, "tool:TextGenerator")
                    .with_config("is_output_tool", json!(true)),
            )
            .add_edge(Edge::conditional(PLANNER, "output", "FINISH"))
            .add_edge(Edge::conditional("output", "text_generator", "OUTPUT:TextGenerator"))
            .add_edge(Edge::unconditional("text_generator", END))
            .build()
            .unwrap();

        let executor = GraphExecutor::new(graph, checkpoint.clone(), context, "task-2", "user-1", "session-1");
        executor.run(RuntimeState::new("goal", None), None).await.unwrap();

        let metadata = checkpoint.metadata("task-2", "user-1").unwrap().unwrap();
        // 2 pre-seeded + planner + output + output_tool = 5
        assert_eq!(metadata.total_steps, 5);
    }

    /// **Scenario**: cancellation checked between node hops stops the loop
    /// cleanly before the next node runs, without raising an error.
    #[tokio::test]
    async fn cancellation_between_nodes_ends_run_cleanly() {
        let (_dir, checkpoint) = store();
        let context = ctx(vec![]);
        let executor = GraphExecutor::new(happy_path_graph(), checkpoint, context, "task-3", "user-1", "session-1");
        let cancelled = std::sync::atomic::AtomicBool::new(true);
        let cancel_fn = move || cancelled.load(std::sync::atomic::Ordering::SeqCst);
        let outcome = executor
            .run(RuntimeState::new("goal", None), Some(&cancel_fn))
            .await
            .unwrap();
        assert_eq!(outcome.status, TaskStatus::Cancelled);
    }
}
