//! Graph validation error: raised at executor construction, never at runtime.
//!
//! Runtime failures to find a matching edge are a different, fatal-but-later
//! category (`graph-navigation`) — see [`crate::error::ExecutorError::NoMatchingEdge`].

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("graph has no node named 'planner'")]
    MissingPlannerNode,

    #[error("node '{0}' has no outgoing edges and is not END")]
    NoOutgoingEdges(String),

    #[error("node '{0}' has more than one unconditional outgoing edge")]
    AmbiguousUnconditionalEdge(String),

    #[error("edge from '{from}' targets unknown node '{to}'")]
    UnknownTarget { from: String, to: String },
}
