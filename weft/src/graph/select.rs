//! Edge selection: deciding which outgoing edge a node's output satisfies.
//!
//! Grounded in the three node-type-specific rules from the design (`planner`,
//! `output`, and the generic "key present and non-null" rule for everything
//! else), plus the unconditional fallback.

use serde_json::Value;

use super::{Edge, Graph, END};

/// What a node produced this hop, abstracted just enough for edge matching.
/// The executor builds this from the concrete `NodeOutput` each handler
/// returns; see [`crate::nodes::NodeOutput`].
pub enum NodeOutputShape<'a> {
    /// The planner's decision: `action` is `"CALL_TOOL"` or `"FINISH"`, and
    /// `tool_name` is set only for `CALL_TOOL`.
    Planner {
        action: &'a str,
        tool_name: Option<&'a str>,
    },
    /// The output selector's chosen generator tool.
    Output { tool_name: &'a str },
    /// Any other node: a free-form map checked for non-null keys.
    Map(&'a Value),
}

/// Finds the next node name for `current`'s `output`, per the rules in
/// `GraphExecutor`'s main loop. Returns `END` unchanged without consulting
/// edges (terminal nodes have none).
pub fn select_edge(
    graph: &Graph,
    current: &str,
    output: &NodeOutputShape<'_>,
) -> Option<String> {
    if current == END {
        return Some(END.to_string());
    }

    let outgoing = graph.outgoing_edges(current);

    for edge in outgoing {
        let Some(key) = edge.condition_key.as_deref() else {
            continue;
        };
        if edge_matches(key, output) {
            return Some(edge.target.clone());
        }
    }

    outgoing
        .iter()
        .find(|e: &&Edge| e.condition_key.is_none())
        .map(|e| e.target.clone())
}

fn edge_matches(condition_key: &str, output: &NodeOutputShape<'_>) -> bool {
    match output {
        NodeOutputShape::Planner { action, tool_name } => {
            if *action == "CALL_TOOL" {
                if let Some(tool_name) = tool_name {
                    if condition_key == format!("CALL_TOOL:{tool_name}") {
                        return true;
                    }
                }
            }
            condition_key == *action
        }
        NodeOutputShape::Output { tool_name } => condition_key == format!("OUTPUT:{tool_name}"),
        NodeOutputShape::Map(value) => value
            .get(condition_key)
            .map(|v| !v.is_null())
            .unwrap_or(false),
    }
}
