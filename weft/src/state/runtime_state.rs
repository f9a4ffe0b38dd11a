//! `RuntimeState`: the in-memory record threaded through every node handler and
//! durably checkpointed after every node hop.
//!
//! The one invariant every writer must respect is that `action_history` is a
//! list-of-lists (outer = conversations within a session, inner = ordered entries
//! of one conversation) and that handlers only ever append to the *last* inner
//! list via [`RuntimeState::push_action_entry`]. Direct mutation of
//! `action_history` elsewhere is a bug.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::todo::TodoItem;

/// How many trailing inner conversations are kept when folding a prior
/// session's `action_history` into a new task's initial state (see
/// SPEC_FULL §2.1, "session merge cap").
pub const SESSION_MERGE_CAP: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionEntryKind {
    Plan,
    ToolOutput,
    Reflection,
    FinalAnswer,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionEntry {
    #[serde(rename = "type")]
    pub kind: ActionEntryKind,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ActionEntry {
    pub fn new(kind: ActionEntryKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            data,
            tool_name: None,
        }
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PreprocessedFiles {
    #[serde(default)]
    pub documents: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub tables: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub images: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub other_files: HashMap<String, serde_json::Value>,
}

impl PreprocessedFiles {
    /// Look up `bucket.filename`, e.g. `("documents", "report.pdf")`. Filenames
    /// may contain dots, which is why callers must not naively `split('.')`.
    pub fn get(&self, bucket: &str, filename: &str) -> Option<&serde_json::Value> {
        match bucket {
            "documents" => self.documents.get(filename),
            "tables" => self.tables.get(filename),
            "images" => self.images.get(filename),
            "other_files" => self.other_files.get(filename),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RetryHistoryEntry {
    pub attempt: u32,
    pub tool_name: String,
    pub error_type: String,
    pub error_message: String,
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Full plan + tool_output + reflection triple kept under one `action_<timestamp>`
/// key so `${action_id}` substitutions (see [`crate::data_ref`]) can resolve.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FullActionRecord {
    pub tool_name: Option<String>,
    pub status: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub plan: Option<serde_json::Value>,
    pub tool_output: Option<serde_json::Value>,
    pub reflection: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DataCatalog {
    pub available_data_types: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeState {
    pub task_goal: String,
    #[serde(default)]
    pub preprocessed_files: PreprocessedFiles,
    #[serde(default)]
    pub origin_images: Vec<String>,
    #[serde(default)]
    pub action_history: Vec<Vec<ActionEntry>>,
    #[serde(default)]
    pub todo: Vec<TodoItem>,
    #[serde(default)]
    pub full_action_data: HashMap<String, FullActionRecord>,
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
    #[serde(default)]
    pub context_memory: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub user_context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub usage: Option<String>,
    /// Transient: set by the output selector, consumed by the next tool node.
    /// Never rely on this surviving a reload across an unrelated resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tool_input: Option<serde_json::Value>,
    #[serde(default)]
    pub retry_history: Vec<RetryHistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<serde_json::Value>,

    /// The user's original, unmodified goal text, kept for session-merge
    /// re-derivation. Not part of the public surface callers mutate.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    original_task_goal: String,

    #[serde(skip)]
    data_catalog_cache: Option<DataCatalog>,
}

impl RuntimeState {
    /// Builds a fresh state for a new task. `usage` is the optional scenario
    /// tag prepended to `task_goal` (SPEC_FULL §2.1).
    pub fn new(original_task_goal: impl Into<String>, usage: Option<String>) -> Self {
        let original_task_goal = original_task_goal.into();
        let task_goal = match &usage {
            Some(u) => format!("{u}\n以下是用户要求：\n```{original_task_goal}```"),
            None => format!("以下是用户需求：\n```{original_task_goal}```"),
        };
        Self {
            task_goal,
            preprocessed_files: PreprocessedFiles::default(),
            origin_images: Vec::new(),
            action_history: vec![Vec::new()],
            todo: Vec::new(),
            full_action_data: HashMap::new(),
            chat_history: Vec::new(),
            context_memory: HashMap::new(),
            user_context: HashMap::new(),
            usage,
            output_tool_input: None,
            retry_history: Vec::new(),
            error_details: None,
            original_task_goal,
            data_catalog_cache: None,
        }
    }

    pub fn original_task_goal(&self) -> &str {
        &self.original_task_goal
    }

    /// Ensures `action_history` satisfies the list-of-lists invariant. Empty
    /// becomes `[[]]`; a flat list of entries (first element not itself a
    /// list) is wrapped with a warning, rather than rejected, per §9's
    /// migration-leniency note. Call this right after deserializing a loaded
    /// checkpoint, before any handler touches state.
    pub fn normalize_action_history(&mut self) {
        if self.action_history.is_empty() {
            self.action_history.push(Vec::new());
        }
    }

    /// Pushes a fresh empty inner list, as done when a new task is appended to
    /// an existing session's history.
    pub fn start_new_conversation(&mut self) {
        self.action_history.push(Vec::new());
    }

    /// The single writer: append `entry` to the last inner list. Creates one
    /// if `action_history` is empty.
    pub fn push_action_entry(&mut self, entry: ActionEntry) {
        if self.action_history.is_empty() {
            self.action_history.push(Vec::new());
        }
        self.action_history
            .last_mut()
            .expect("just ensured non-empty")
            .push(entry);
    }

    /// Folds a prior session's `action_history` into this freshly-constructed
    /// state, keeping at most [`SESSION_MERGE_CAP`] trailing conversations,
    /// then opens a new conversation for the incoming task.
    pub fn merge_session_history(&mut self, mut prior_history: Vec<Vec<ActionEntry>>) {
        if prior_history.len() > SESSION_MERGE_CAP {
            prior_history = prior_history.split_off(prior_history.len() - SESSION_MERGE_CAP);
        }
        self.action_history = prior_history;
        self.start_new_conversation();
    }

    /// Re-derives the enhanced task goal used after a session merge:
    /// `"历史对话上下文：\n{history}\n\n当前任务：{goal}"`.
    pub fn enhanced_task_goal_with_history(&self, formatted_history: &str) -> String {
        format!(
            "历史对话上下文：\n{formatted_history}\n\n当前任务：{}",
            self.original_task_goal
        )
    }

    pub fn get_full_action_data(&self, action_id: &str) -> Option<&FullActionRecord> {
        self.full_action_data.get(action_id)
    }

    /// Resolves a dotted path such as `preprocessed_files.documents.report.pdf`
    /// against this state. `preprocessed_files.*` paths split into at most
    /// three segments so filenames containing dots survive intact.
    pub fn extract_data_by_path(&self, path: &str) -> Option<serde_json::Value> {
        if let Some(rest) = path.strip_prefix("preprocessed_files.") {
            let mut parts = rest.splitn(2, '.');
            let bucket = parts.next()?;
            let filename = parts.next()?;
            return self.preprocessed_files.get(bucket, filename).cloned();
        }

        // Generic dotted path into context_memory / user_context style maps.
        let mut parts = path.split('.');
        let root = parts.next()?;
        let mut current: serde_json::Value = match root {
            "context_memory" => serde_json::to_value(&self.context_memory).ok()?,
            "user_context" => serde_json::to_value(&self.user_context).ok()?,
            _ => return None,
        };
        for part in parts {
            current = current.get(part)?.clone();
        }
        Some(current)
    }

    /// Invalidated after every reflection step (the catalog is a projection of
    /// `full_action_data`, which reflection just updated).
    pub fn invalidate_data_catalog(&mut self) {
        self.data_catalog_cache = None;
    }

    /// Computes (and caches) a high-level description of the data available to
    /// the planner: file counts/refs and a summary of executed actions. Never
    /// exposes raw content, only shape.
    pub fn get_data_catalog(&mut self) -> DataCatalog {
        if let Some(cached) = &self.data_catalog_cache {
            return cached.clone();
        }

        let doc_refs: HashMap<String, String> = self
            .preprocessed_files
            .documents
            .keys()
            .enumerate()
            .map(|(i, k)| (format!("doc_{}", i + 1), format!("preprocessed_files.documents.{k}")))
            .collect();
        let table_refs: HashMap<String, String> = self
            .preprocessed_files
            .tables
            .keys()
            .enumerate()
            .map(|(i, k)| (format!("table_{}", i + 1), format!("preprocessed_files.tables.{k}")))
            .collect();

        let mut by_tool: HashMap<String, u32> = HashMap::new();
        let mut successful_actions = Vec::new();
        let mut action_results: HashMap<String, serde_json::Value> = HashMap::new();
        for (action_id, record) in &self.full_action_data {
            let tool = record.tool_name.clone().unwrap_or_else(|| "unknown".into());
            *by_tool.entry(tool.clone()).or_insert(0) += 1;
            if record.status.as_deref() == Some("success") {
                successful_actions.push(serde_json::json!({
                    "action_id": action_id,
                    "tool": tool,
                    "timestamp": record.timestamp,
                    "has_data": record.tool_output.is_some(),
                }));
                action_results.insert(
                    action_id.clone(),
                    serde_json::json!({
                        "tool": tool,
                        "sufficient": true,
                    }),
                );
            }
        }

        let catalog = DataCatalog {
            available_data_types: serde_json::json!({
                "preprocessed_files": {
                    "documents": { "count": self.preprocessed_files.documents.len(), "refs": doc_refs },
                    "tables": { "count": self.preprocessed_files.tables.len(), "refs": table_refs },
                    "other_files": { "count": self.preprocessed_files.other_files.len() },
                },
                "execution_history": {
                    "total_actions": self.full_action_data.len(),
                    "by_tool": by_tool,
                    "successful_actions": successful_actions,
                    "action_results": action_results,
                },
            }),
        };
        self.data_catalog_cache = Some(catalog.clone());
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: a brand-new task's `task_goal` wraps the original text, and
    /// the original survives unmodified in the private field.
    #[test]
    fn new_state_composes_task_goal_without_usage() {
        let state = RuntimeState::new("summarize attached notes", None);
        assert!(state.task_goal.contains("以下是用户需求"));
        assert!(state.task_goal.contains("summarize attached notes"));
        assert_eq!(state.original_task_goal(), "summarize attached notes");
        assert_eq!(state.action_history, vec![Vec::<ActionEntry>::new()]);
    }

    /// **Scenario**: `usage` is prepended ahead of the quoted goal.
    #[test]
    fn new_state_composes_task_goal_with_usage() {
        let state = RuntimeState::new("do the thing", Some("scenario-x".into()));
        assert!(state.task_goal.starts_with("scenario-x\n"));
    }

    /// **Scenario** (invariant, §8): `action_history[-1]` is always a list; a
    /// push always lands in the last inner list.
    #[test]
    fn push_action_entry_appends_to_last_conversation() {
        let mut state = RuntimeState::new("goal", None);
        state.push_action_entry(ActionEntry::new(ActionEntryKind::Plan, serde_json::json!({})));
        state.start_new_conversation();
        state.push_action_entry(ActionEntry::new(
            ActionEntryKind::ToolOutput,
            serde_json::json!({}),
        ));
        assert_eq!(state.action_history.len(), 2);
        assert_eq!(state.action_history[0].len(), 1);
        assert_eq!(state.action_history[1].len(), 1);
    }

    /// **Scenario**: session merge caps history at 10 trailing conversations
    /// and opens a fresh one for the new task.
    #[test]
    fn merge_session_history_caps_at_ten() {
        let mut state = RuntimeState::new("goal", None);
        let prior: Vec<Vec<ActionEntry>> = (0..15).map(|_| Vec::new()).collect();
        state.merge_session_history(prior);
        // 10 kept + 1 fresh conversation for the new task.
        assert_eq!(state.action_history.len(), 11);
    }

    /// **Scenario**: `preprocessed_files.` paths split on at most 3 segments so
    /// a dotted filename is preserved whole.
    #[test]
    fn extract_data_by_path_preserves_dotted_filename() {
        let mut state = RuntimeState::new("goal", None);
        state.preprocessed_files.documents.insert(
            "report.v2.pdf".to_string(),
            serde_json::json!("content"),
        );
        let found = state.extract_data_by_path("preprocessed_files.documents.report.v2.pdf");
        assert_eq!(found, Some(serde_json::json!("content")));
    }

    /// **Scenario**: data catalog is cached until explicitly invalidated.
    #[test]
    fn data_catalog_is_cached_until_invalidated() {
        let mut state = RuntimeState::new("goal", None);
        state.preprocessed_files.documents.insert("a.md".into(), serde_json::json!("x"));
        let first = state.get_data_catalog();
        state.preprocessed_files.documents.insert("b.md".into(), serde_json::json!("y"));
        let second = state.get_data_catalog();
        assert_eq!(first.available_data_types, second.available_data_types);
        state.invalidate_data_catalog();
        let third = state.get_data_catalog();
        assert_ne!(second.available_data_types, third.available_data_types);
    }

    /// **Scenario**: the execution-history summary keys a `sufficient: true`
    /// ref by `action_id` for every successful action, and omits failed ones.
    #[test]
    fn data_catalog_action_results_keyed_by_action_id() {
        let mut state = RuntimeState::new("goal", None);
        state.full_action_data.insert(
            "action_1".to_string(),
            FullActionRecord {
                tool_name: Some("Summarizer".to_string()),
                status: Some("success".to_string()),
                timestamp: Some(Utc::now()),
                tool_output: Some(serde_json::json!({"ok": true})),
                ..Default::default()
            },
        );
        state.full_action_data.insert(
            "action_2".to_string(),
            FullActionRecord {
                tool_name: Some("GoogleSearch".to_string()),
                status: Some("failed".to_string()),
                ..Default::default()
            },
        );

        let catalog = state.get_data_catalog();
        let execution_history = &catalog.available_data_types["execution_history"];
        let action_results = &execution_history["action_results"];
        assert_eq!(
            action_results["action_1"],
            serde_json::json!({"tool": "Summarizer", "sufficient": true})
        );
        assert!(action_results.get("action_2").is_none());
    }
}
