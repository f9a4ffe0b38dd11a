//! The checkpoint store: atomic, versioned, file-primary persistence of
//! [`RuntimeState`] with a database-secondary fallback.
//!
//! `Save` never propagates a filesystem failure to the caller — it falls back
//! to the database and only logs. `Load` tries the workflow directory first,
//! then the database, returning `None` when neither has a record.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::state::RuntimeState;

use super::action_id::new_action_id;
use super::atomic::{atomic_write, locked_read, rotate_versions};
use super::db::DbCheckpointFallback;
use super::workflow_dir::{
    get_or_create_workflow_directory, load_metadata, metadata_file, save_metadata, state_file,
    step_artifact_path, WorkflowMetadata,
};
use super::CheckpointError;

/// Number of prior `state.json` versions kept alongside the live file.
pub const MAX_VERSIONS: u32 = 3;

pub struct CheckpointStore {
    base_path: PathBuf,
    db: DbCheckpointFallback,
}

impl CheckpointStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let base_path = base_path.into();
        let db = DbCheckpointFallback::open(&base_path.join("checkpoints.sqlite3"))?;
        Ok(Self { base_path, db })
    }

    /// For tests: an in-memory database fallback with a real (tempdir-backed)
    /// filesystem path, so file-primary behavior is still exercised.
    pub fn with_db(base_path: impl Into<PathBuf>, db: DbCheckpointFallback) -> Self {
        Self {
            base_path: base_path.into(),
            db,
        }
    }

    pub fn create_workflow_directory(
        &self,
        task_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<PathBuf, CheckpointError> {
        let dir = get_or_create_workflow_directory(&self.base_path, user_id, task_id)?;
        let mut metadata = load_metadata(&dir)?;
        metadata.task_id = task_id.to_string();
        metadata.user_id = user_id.to_string();
        metadata.session_id = session_id.to_string();
        metadata.last_update = Some(Utc::now());
        save_metadata(&dir, &metadata)?;
        Ok(dir)
    }

    /// Saves `state` for `task_id`. Never raises to the caller: a filesystem
    /// failure is logged and the store falls back to a database-only save.
    pub fn save(&self, task_id: &str, user_id: &str, session_id: &str, state: &RuntimeState) {
        debug!(task_id, action_history_len = state.action_history.len(), "saving checkpoint");

        let file_result = self.save_to_filesystem(task_id, user_id, session_id, state);
        if let Err(e) = &file_result {
            warn!(task_id, error = %e, "filesystem checkpoint save failed, falling back to database");
        }

        let needs_db_fallback = file_result.is_err();
        if needs_db_fallback {
            match serde_json::to_string(state) {
                Ok(json) => {
                    if let Err(e) = self.db.save(task_id, &json) {
                        error!(task_id, error = %e, "database fallback save also failed");
                    } else {
                        info!(task_id, "fell back to database-only save");
                    }
                }
                Err(e) => error!(task_id, error = %e, "failed to serialize state for db fallback"),
            }
        }
    }

    fn save_to_filesystem(
        &self,
        task_id: &str,
        user_id: &str,
        session_id: &str,
        state: &RuntimeState,
    ) -> Result<(), CheckpointError> {
        validate_action_history_shape(state)?;

        let dir = self.create_workflow_directory(task_id, user_id, session_id)?;
        let target = state_file(&dir);

        if target.exists() {
            rotate_versions(&target, MAX_VERSIONS)?;
        }

        let bytes = serde_json::to_vec_pretty(state)?;
        atomic_write(&target, &bytes)?;

        let mut metadata = load_metadata(&dir)?;
        metadata.last_update = Some(Utc::now());
        metadata.action_count = state.action_history.iter().map(|c| c.len() as u64).sum();
        metadata.todo_count = state.todo.len() as u64;
        save_metadata(&dir, &metadata)?;

        Ok(())
    }

    /// Loads state for `task_id`: newest `state.json` (and its rotated
    /// backups) under the timestamped session directory, then the
    /// older-format `{user_id}/{task_id}/` directory, then the database.
    /// Returns `None` when nothing exists.
    pub fn load(&self, task_id: &str, user_id: &str) -> Result<Option<RuntimeState>, CheckpointError> {
        if let Some(dir) = super::workflow_dir::find_workflow_directory(&self.base_path, user_id, task_id) {
            if let Some(state) = self.try_read_state_and_backups(task_id, &dir)? {
                return Ok(Some(state));
            }
        }

        if let Some(dir) =
            super::workflow_dir::find_legacy_workflow_directory(&self.base_path, user_id, task_id)
        {
            if let Some(state) = self.try_read_state_and_backups(task_id, &dir)? {
                warn!(task_id, "loaded state from older-format task directory");
                return Ok(Some(state));
            }
        }

        if let Some(json) = self.db.load(task_id)? {
            info!(task_id, "loaded state from database (filesystem unavailable)");
            let mut state: RuntimeState = serde_json::from_str(&json)?;
            state.normalize_action_history();
            return Ok(Some(state));
        }

        Ok(None)
    }

    /// Tries the live `state.json` in `dir`, then its rotated `.1`/`.2`/`.3` backups.
    fn try_read_state_and_backups(
        &self,
        task_id: &str,
        dir: &Path,
    ) -> Result<Option<RuntimeState>, CheckpointError> {
        let target = state_file(dir);
        if let Some(state) = self.try_read_state(&target)? {
            return Ok(Some(state));
        }
        for version in 1..=MAX_VERSIONS {
            let backup = super::atomic::versioned_path(&target, version);
            if let Some(state) = self.try_read_state(&backup)? {
                warn!(task_id, version, "loaded state from rotated backup");
                return Ok(Some(state));
            }
        }
        Ok(None)
    }

    fn try_read_state(&self, path: &Path) -> Result<Option<RuntimeState>, CheckpointError> {
        let Some(bytes) = locked_read(path)? else {
            return Ok(None);
        };
        let mut state: RuntimeState = serde_json::from_slice(&bytes)?;
        state.normalize_action_history();
        Ok(Some(state))
    }

    /// Writes the step artifact `<n>_<type>[_<tool>].json` and bumps
    /// `metadata.total_steps`.
    pub fn save_step(
        &self,
        task_id: &str,
        user_id: &str,
        session_id: &str,
        step_number: u64,
        node_type: &str,
        output: &serde_json::Value,
        tool_name: Option<&str>,
    ) -> Result<(), CheckpointError> {
        let dir = self.create_workflow_directory(task_id, user_id, session_id)?;
        let path = step_artifact_path(&dir, step_number, node_type, tool_name);
        let artifact = serde_json::json!({
            "step_number": step_number,
            "node_type": node_type,
            "tool_name": tool_name,
            "timestamp": Utc::now().to_rfc3339(),
            "output": output,
        });
        atomic_write(&path, &serde_json::to_vec_pretty(&artifact)?)?;

        let mut metadata = load_metadata(&dir)?;
        metadata.total_steps += 1;
        if !metadata.node_types_executed.contains(&node_type.to_string()) {
            metadata.node_types_executed.push(node_type.to_string());
        }
        save_metadata(&dir, &metadata)
    }

    pub fn metadata(&self, task_id: &str, user_id: &str) -> Result<Option<WorkflowMetadata>, CheckpointError> {
        let Some(dir) = super::workflow_dir::find_workflow_directory(&self.base_path, user_id, task_id) else {
            return Ok(None);
        };
        if !metadata_file(&dir).exists() {
            return Ok(None);
        }
        Ok(Some(load_metadata(&dir)?))
    }

    /// Generates a fresh `action_<timestamp>` id for `full_action_data`.
    pub fn new_action_id(&self) -> String {
        new_action_id()
    }
}

/// The one state-shape invariant the store enforces on save/load:
/// `action_history` must be a list-of-lists. Empty is normalized to `[[]]`
/// before this check ever runs (see [`RuntimeState::normalize_action_history`]).
fn validate_action_history_shape(state: &RuntimeState) -> Result<(), CheckpointError> {
    if state.action_history.is_empty() {
        return Err(CheckpointError::InvalidActionHistoryShape(
            "action_history must not be empty at save time; call normalize_action_history() first"
                .to_string(),
        ));
    }
    Ok(())
}
