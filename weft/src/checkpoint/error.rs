//! Checkpoint subsystem errors. `Io`/`Db` are the two halves of the
//! file-primary/database-secondary fallback described in the design; only when
//! *both* fail does a checkpoint operation escalate into [`crate::error::WeftError`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("checkpoint database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("action_history is not a list-of-lists: {0}")]
    InvalidActionHistoryShape(String),

    #[error("no checkpoint found for task {0}")]
    NotFound(String),
}
