//! # Weft
//!
//! A durable graph executor for agent task loops: a directed graph of
//! **planner → tool → reflection → output-selector** nodes, walked by one
//! main loop that checkpoints after every hop so a crashed or killed task
//! resumes exactly where it left off.
//!
//! ## Design principles
//!
//! - **One state type**: [`RuntimeState`] carries the task goal, action
//!   history, TODOs, and chat history through every node; nodes read it and
//!   return a delta, never a whole new graph.
//! - **File-first, DB-secondary persistence**: every hop is checkpointed to
//!   an atomically-written JSON file before anything else; a SQLite table is
//!   a fallback path for when the filesystem write itself fails, not a
//!   primary store. See [`checkpoint::CheckpointStore`].
//! - **Edges are data**: a `condition_key` string on each [`graph::Edge`] is
//!   matched against a node's output shape by [`graph::select_edge`] — no
//!   closures stored on the graph itself.
//! - **Retry and recovery are explicit layers**: schema-retry lives in the
//!   node handlers ([`nodes::run_planner`] and friends), network/backoff
//!   retry and output-tool fallback live in [`executor::run_output_tool_with_recovery`].
//!
//! ## Main modules
//!
//! - [`state`]: [`RuntimeState`], [`ActionStep`], [`TodoItem`] — the data that
//!   flows through the graph and gets checkpointed.
//! - [`graph`]: [`graph::Graph`], [`graph::GraphBuilder`], [`graph::Node`],
//!   [`graph::Edge`], [`graph::select_edge`] — build and route a graph.
//! - [`checkpoint`]: [`checkpoint::CheckpointStore`] — file-first/DB-fallback
//!   persistence and workflow directory layout.
//! - [`tools`]: [`tools::Tool`] trait, [`tools::ToolRegistry`], [`tools::ToolOutput`].
//! - [`model_config`]: [`model_config::ModelConfigResolver`] — override →
//!   runtime map → persisted config → env cascade for per-node model ids.
//! - [`data_ref`]: [`data_ref::replace_data_markers`] — `${...}` substitution
//!   of prior action results into tool inputs.
//! - [`llm`]: [`llm::StructuredLlm`] trait, [`llm::MockStructuredLlm`].
//! - [`nodes`]: the four node handlers plus their shared [`nodes::NodeContext`].
//! - [`executor`]: [`executor::GraphExecutor`] — the main loop.
//! - [`prompts`]: [`prompts::PromptSet`] — node system prompts, embedded with
//!   directory/env overrides.
//! - [`error`]: [`WeftError`] and friends — the `Result` every subsystem composes into.
//!
//! Key types are re-exported at crate root: `use weft::{GraphExecutor, RuntimeState, Graph};`.

pub mod checkpoint;
pub mod data_ref;
pub mod error;
pub mod executor;
pub mod graph;
pub mod llm;
pub mod model_config;
pub mod nodes;
pub mod prompts;
pub mod state;
pub mod tools;

pub use checkpoint::{CheckpointError, CheckpointStore, WorkflowMetadata, MAX_VERSIONS};
pub use data_ref::replace_data_markers;
pub use error::{ExecutorError, NodeError, WeftError};
pub use executor::{
    backoff_delay_ms, classify_error, run_output_tool_with_recovery, ErrorClass, GraphExecutor,
    RecoveryFailure, RecoveryOutcome, TaskOutcome, TaskStatus,
};
pub use graph::{
    select_edge, Edge, Graph, GraphBuilder, GraphError, Node, NodeKind, NodeOutputShape, END,
    PLANNER,
};
pub use llm::{LlmError, LlmUsage, MockStructuredLlm, StructuredLlm, StructuredLlmResponse};
pub use model_config::{
    validate_model, ModelCatalog, ModelConfigResolver, NodeConfig, NodeConfigSource, RuntimeMap,
    StaticModelCatalog, StaticNodeConfigSource,
};
pub use nodes::{
    default_tool_keywords, run_planner, run_reflection, run_tool, select_output_tool, NodeContext,
    OutputGuidance, OutputToolDecision, PlannerAction, PlannerError, PlannerOutput,
    ReflectionConfig, ReflectionError, ReflectionOutput,
};
pub use prompts::{
    default_from_embedded as default_node_prompts_from_yaml, load as load_node_prompts,
    load_or_default as load_node_prompts_or_default, LoadError as PromptsLoadError, NodePrompt,
    PromptSet,
};
pub use state::{
    ActionEntry, ActionEntryKind, ActionStep, ChatMessage, DataCatalog, FullActionRecord, LogType,
    PreprocessedFiles, RetryHistoryEntry, RuntimeState, TodoErrorEntry, TodoItem, TodoStatus,
    SESSION_MERGE_CAP,
};
pub use tools::{
    Tool, ToolCategory, ToolDescriptor, ToolError, ToolOutput, ToolRegistry, ToolStatus,
    STATE_INJECTION_KEY,
};
