//! Top-level error type for the graph executor.
//!
//! Each subsystem owns a `thiserror` enum describing its own failure modes; this
//! type composes them so callers driving [`crate::executor::GraphExecutor`] have
//! one `Result` to match on. See `graph-validation` / `graph-navigation` /
//! `state-shape` / `llm-schema` / `tool-exec` / `output-tool-exhausted` /
//! `persistence` / `cancelled` in the design notes for which variant maps to which
//! category.

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::graph::GraphError;

/// Errors a node handler can return; distinct from a tool's own recoverable
/// `ToolOutput { status: Error, .. }`, which is data, not a Rust `Err`.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("structured output did not match schema after retry: {0}")]
    SchemaRetryExhausted(String),
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("llm call failed: {0}")]
    Llm(String),
}

/// Fatal errors raised by the graph executor's main loop.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("no outgoing edge matched node {node} with output {output}")]
    NoMatchingEdge { node: String, output: String },

    #[error("output tool exhausted retries and all fallbacks: {0}")]
    OutputToolExhausted(String),

    #[error("node {node} failed: {source}")]
    Node {
        node: String,
        #[source]
        source: NodeError,
    },
}

/// The union of everything that can end a task run early.
#[derive(Debug, Error)]
pub enum WeftError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}
