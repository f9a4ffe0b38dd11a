//! Durable, file-first persistence of [`crate::state::RuntimeState`] with a
//! database-secondary fallback. See [`store::CheckpointStore`] for the
//! public entry point.

mod action_id;
mod atomic;
mod db;
mod error;
mod store;
mod workflow_dir;

pub use action_id::{is_action_id, new_action_id};
pub use db::DbCheckpointFallback;
pub use error::CheckpointError;
pub use store::{CheckpointStore, MAX_VERSIONS};
pub use workflow_dir::{sanitize_tool_name, WorkflowMetadata};
