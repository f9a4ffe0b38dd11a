//! TODO list: the sub-goal lifecycle tracked alongside `RuntimeState`.
//!
//! Produced wholesale by the `TodoGenerator` tool and then advanced in place by
//! [`crate::nodes::reflection`] as tool results come back. See `ReflectionConfig`
//! for the keyword table that decides which TODO a tool result applies to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one TODO item. Transitions: `pending -> processing -> completed`
/// or `pending -> processing -> pending` (retry) `-> failed` (retry/timeout exhausted).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One entry recorded in `TodoItem::error_history` each time a tool run for this
/// TODO comes back as anything other than success.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TodoErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    pub status: String,
    pub error: String,
    pub retry_count: u32,
    #[serde(default)]
    pub execution_time: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub task: String,
    #[serde(default = "TodoItem::default_status")]
    pub status: TodoStatus,
    #[serde(default)]
    pub suggested_tools: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub retry: u32,
    #[serde(default = "TodoItem::default_max_retry")]
    pub max_retry: u32,
    #[serde(default = "TodoItem::default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_history: Vec<TodoErrorEntry>,
    #[serde(default)]
    pub execution_time: Option<f64>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl TodoItem {
    fn default_status() -> TodoStatus {
        TodoStatus::Pending
    }

    fn default_max_retry() -> u32 {
        3
    }

    fn default_timeout() -> u64 {
        300
    }

    /// Are all of this item's `dependencies` marked `completed` elsewhere in `todo`?
    pub fn dependencies_met(&self, todo: &[TodoItem]) -> bool {
        self.dependencies.iter().all(|dep_id| {
            todo.iter()
                .any(|t| &t.id == dep_id && t.status == TodoStatus::Completed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: a TODO with no dependencies is trivially satisfied.
    #[test]
    fn dependencies_met_when_empty() {
        let item = TodoItem {
            id: "1".into(),
            task: "t".into(),
            status: TodoStatus::Pending,
            suggested_tools: vec![],
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
        };
        assert!(item.dependencies_met(&[]));
    }

    /// **Scenario**: a dependency that is still pending blocks promotion.
    #[test]
    fn dependencies_met_false_when_dep_not_completed() {
        let mut dep = make("dep", TodoStatus::Pending);
        let item = make_with_deps("main", vec!["dep".into()]);
        dep.status = TodoStatus::Processing;
        assert!(!item.dependencies_met(&[dep]));
    }

    fn make(id: &str, status: TodoStatus) -> TodoItem {
        TodoItem {
            id: id.into(),
            task: "t".into(),
            status,
            suggested_tools: vec![],
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
        }
    }

    fn make_with_deps(id: &str, deps: Vec<String>) -> TodoItem {
        let mut item = make(id, TodoStatus::Pending);
        item.dependencies = deps;
        item
    }
}
