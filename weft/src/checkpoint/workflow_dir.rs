//! Per-task filesystem layout:
//! `{base}/{user_id}/sessions/{YYYYMMDD_HHMMSS}_{task_id}/`.
//!
//! One directory per task holds `state.json` (+ rotated backups),
//! `metadata.json`, and one step artifact file per node hop.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::atomic::atomic_write;
use super::CheckpointError;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub task_id: String,
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub last_update: Option<chrono::DateTime<Utc>>,
    #[serde(default)]
    pub action_count: u64,
    #[serde(default)]
    pub todo_count: u64,
    #[serde(default)]
    pub total_steps: u64,
    #[serde(default)]
    pub node_types_executed: Vec<String>,
}

/// Replaces non-word characters with `_` and truncates at 50 chars, matching
/// the artifact-filename contract (`<n>_call_tool_<sanitized_tool>.json`).
pub fn sanitize_tool_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    sanitized.chars().take(50).collect()
}

/// Finds the existing workflow directory for `task_id` under
/// `{base}/{user_id}/sessions/`, matching the `*_{task_id}` glob used by the
/// original implementation, without creating one.
pub fn find_workflow_directory(base: &Path, user_id: &str, task_id: &str) -> Option<PathBuf> {
    let sessions_dir = base.join(user_id).join("sessions");
    let entries = std::fs::read_dir(&sessions_dir).ok()?;
    let suffix = format!("_{task_id}");
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(&suffix))
                .unwrap_or(false)
        })
}

/// Finds the older-format workflow directory `{base}/{user_id}/{task_id}/`
/// used before the `sessions/{timestamp}_{task_id}` layout, for reading tasks
/// checkpointed by that earlier layout.
pub fn find_legacy_workflow_directory(base: &Path, user_id: &str, task_id: &str) -> Option<PathBuf> {
    let dir = base.join(user_id).join(task_id);
    dir.is_dir().then_some(dir)
}

/// Finds the existing workflow directory, or creates a freshly timestamped one.
pub fn get_or_create_workflow_directory(
    base: &Path,
    user_id: &str,
    task_id: &str,
) -> Result<PathBuf, CheckpointError> {
    if let Some(existing) = find_workflow_directory(base, user_id, task_id) {
        return Ok(existing);
    }
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let dir = base
        .join(user_id)
        .join("sessions")
        .join(format!("{timestamp}_{task_id}"));
    std::fs::create_dir_all(&dir).map_err(|source| CheckpointError::Io {
        path: dir.display().to_string(),
        source,
    })?;
    Ok(dir)
}

pub fn state_file(workflow_dir: &Path) -> PathBuf {
    workflow_dir.join("state.json")
}

pub fn metadata_file(workflow_dir: &Path) -> PathBuf {
    workflow_dir.join("metadata.json")
}

/// Writes a step artifact: `<n>_<type>[_<sanitized_tool>].json`.
pub fn step_artifact_path(workflow_dir: &Path, step_number: u64, node_type: &str, tool_name: Option<&str>) -> PathBuf {
    match tool_name {
        Some(tool) => workflow_dir.join(format!(
            "{step_number}_{node_type}_{}.json",
            sanitize_tool_name(tool)
        )),
        None => workflow_dir.join(format!("{step_number}_{node_type}.json")),
    }
}

/// Loads `metadata.json`, defaulting to an empty record when absent.
pub fn load_metadata(workflow_dir: &Path) -> Result<WorkflowMetadata, CheckpointError> {
    let path = metadata_file(workflow_dir);
    match std::fs::read(&path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(WorkflowMetadata::default()),
        Err(source) => Err(CheckpointError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Merges `updates` over existing `metadata.json` and writes it back atomically.
pub fn save_metadata(workflow_dir: &Path, metadata: &WorkflowMetadata) -> Result<(), CheckpointError> {
    let bytes = serde_json::to_vec_pretty(metadata)?;
    atomic_write(&metadata_file(workflow_dir), &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_tool_name_replaces_non_word_chars_and_truncates() {
        let long = "a".repeat(60);
        assert_eq!(sanitize_tool_name(&long).len(), 50);
        assert_eq!(sanitize_tool_name("Report Generator!"), "Report_Generator_");
    }

    /// **Scenario**: creating a workflow directory twice for the same task
    /// returns the same path (idempotent via the `*_{task_id}` glob lookup).
    #[test]
    fn get_or_create_is_idempotent_for_same_task() {
        let base = tempfile::tempdir().unwrap();
        let first = get_or_create_workflow_directory(base.path(), "user-1", "task-1").unwrap();
        let second = get_or_create_workflow_directory(base.path(), "user-1", "task-1").unwrap();
        assert_eq!(first, second);
    }
}
