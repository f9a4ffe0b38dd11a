//! The graph executor: the main loop that drives one task from `planner` to
//! `END`, dispatching to node handlers, checkpointing after every hop, and
//! applying output-tool retry & recovery.

mod graph_executor;
mod retry;

pub use graph_executor::{GraphExecutor, TaskOutcome, TaskStatus};
pub use retry::{
    backoff_delay_ms, classify_error, run_output_tool_with_recovery, ErrorClass, RecoveryFailure,
    RecoveryOutcome,
};
