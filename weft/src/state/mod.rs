//! Runtime state: the record carried through every node invocation and
//! durably checkpointed after each hop.
//!
//! # Main types
//!
//! - [`RuntimeState`]: task goal, preprocessed files, action history, TODOs,
//!   chat history, and the per-action data store, plus the invariant helpers
//!   ([`RuntimeState::push_action_entry`], [`RuntimeState::normalize_action_history`])
//!   that keep `action_history` a well-formed list-of-lists.
//! - [`TodoItem`] / [`TodoStatus`]: the sub-goal lifecycle, advanced by
//!   [`crate::nodes::reflection`].
//! - [`ActionStep`]: the append-only log row emitted once per node hop by
//!   [`crate::executor`].

mod action_step;
mod runtime_state;
mod todo;

pub use action_step::{ActionStep, LogType};
pub use runtime_state::{
    ActionEntry, ActionEntryKind, ChatMessage, DataCatalog, FullActionRecord, PreprocessedFiles,
    RetryHistoryEntry, RuntimeState, SESSION_MERGE_CAP,
};
pub use todo::{TodoErrorEntry, TodoItem, TodoStatus};
