//! The declarative graph: nodes plus typed directed edges.
//!
//! Unlike a closure-based router, edges here are pure data (`condition_key`
//! strings) so a graph can be defined once, validated at construction, and then
//! walked by [`crate::executor::GraphExecutor`] purely by inspecting node
//! output — see [`crate::graph::select_edge`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::GraphError;

/// Reserved terminal node name. Never appears in `Graph::nodes`.
pub const END: &str = "END";

/// Reserved entry point node name. Every graph must define exactly one.
pub const PLANNER: &str = "planner";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A router node: `planner`, `reflection`, or `output`. Dispatches to a
    /// handler in [`crate::nodes`], never to a registered tool.
    Router,
    /// A registered tool invoked through the Tool Executor.
    Tool,
    /// A bare LLM call with no tool-registry involvement (rare; mostly for
    /// future extension — the current node set is fully covered by Router/Tool).
    Llm,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub display_name: String,
    pub kind: NodeKind,
    /// Symbolic reference resolved to a handler at executor construction; see
    /// [`crate::nodes::HandlerRegistry`].
    pub callable_path: String,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind, callable_path: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            kind,
            callable_path: callable_path.into(),
            config: HashMap::new(),
        }
    }

    pub fn with_config(mut self, key: &str, value: serde_json::Value) -> Self {
        self.config.insert(key.to_string(), value);
        self
    }

    pub fn is_output_tool(&self) -> bool {
        self.config
            .get("is_output_tool")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn model_name(&self) -> Option<&str> {
        self.config.get("model_name").and_then(|v| v.as_str())
    }

    pub fn retry_count(&self) -> Option<u32> {
        self.config
            .get("retry_count")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_key: Option<String>,
}

impl Edge {
    pub fn unconditional(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            condition_key: None,
        }
    }

    pub fn conditional(
        source: impl Into<String>,
        target: impl Into<String>,
        condition_key: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            condition_key: Some(condition_key.into()),
        }
    }
}

/// A compiled, validated graph: ready for [`crate::executor::GraphExecutor`].
#[derive(Clone, Debug)]
pub struct Graph {
    pub name: String,
    nodes: HashMap<String, Node>,
    edges_by_source: HashMap<String, Vec<Edge>>,
}

impl Graph {
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn outgoing_edges(&self, source: &str) -> &[Edge] {
        self.edges_by_source
            .get(source)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// Builds and validates a [`Graph`]. Validation happens once, at construction
/// (the "graph-validation" error category) — never at traversal time.
#[derive(Default)]
pub struct GraphBuilder {
    name: String,
    nodes: HashMap<String, Node>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: HashMap::new(),
            edges: Vec::new(),
        }
    }

    pub fn add_node(mut self, node: Node) -> Self {
        self.nodes.insert(node.name.clone(), node);
        self
    }

    pub fn add_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn build(self) -> Result<Graph, GraphError> {
        if !self.nodes.contains_key(PLANNER) {
            return Err(GraphError::MissingPlannerNode);
        }

        let mut edges_by_source: HashMap<String, Vec<Edge>> = HashMap::new();
        for edge in &self.edges {
            if edge.target != END && !self.nodes.contains_key(&edge.target) {
                return Err(GraphError::UnknownTarget {
                    from: edge.source.clone(),
                    to: edge.target.clone(),
                });
            }
            edges_by_source
                .entry(edge.source.clone())
                .or_default()
                .push(edge.clone());
        }

        for name in self.nodes.keys() {
            let outgoing = edges_by_source.get(name).map(|v| v.as_slice()).unwrap_or(&[]);
            if outgoing.is_empty() {
                return Err(GraphError::NoOutgoingEdges(name.clone()));
            }
            let unconditional_count = outgoing.iter().filter(|e| e.condition_key.is_none()).count();
            if unconditional_count > 1 {
                return Err(GraphError::AmbiguousUnconditionalEdge(name.clone()));
            }
        }

        Ok(Graph {
            name: self.name,
            nodes: self.nodes,
            edges_by_source,
        })
    }
}
