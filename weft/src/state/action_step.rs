//! `ActionStep`: the structured log row emitted once per node hop.
//!
//! Distinct from the step artifact JSON file written by the checkpoint store —
//! this is the append-only observation trail; the artifact is a point-in-time
//! snapshot of one step's output. See [`crate::checkpoint`] for the artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Planner,
    ToolCall,
    ToolResult,
    Reflection,
    FinalAnswer,
    TodoUpdate,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionStep {
    pub task_id: String,
    pub step_order: u64,
    pub log_type: LogType,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
