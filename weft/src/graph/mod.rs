//! The graph: a named set of nodes and typed directed edges, validated once at
//! construction and then walked by [`crate::executor::GraphExecutor`].
//!
//! Edges are data, not closures: a `condition_key` string is matched against a
//! node's output by [`select_edge`], following the three rules in the design
//! (planner `CALL_TOOL:<tool>` / `FINISH`, output `OUTPUT:<tool>`, and generic
//! "key present and non-null" for everything else), falling back to the single
//! unconditional edge a node may declare.

mod error;
mod model;
mod select;

pub use error::GraphError;
pub use model::{Edge, Graph, GraphBuilder, Node, NodeKind, END, PLANNER};
pub use select::{select_edge, NodeOutputShape};
