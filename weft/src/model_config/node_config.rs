//! Persisted per-node configuration, injected as a `dyn NodeConfigSource` so
//! the resolver doesn't assume a particular database — mirrors how the
//! originating service wraps a DB table behind a narrow lookup.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

/// Looks up persisted configuration by node/tool name. Implementations must
/// tolerate datastore errors by returning `None` rather than propagating —
/// the resolver falls through to the next cascade step either way.
pub trait NodeConfigSource: Send + Sync {
    fn get(&self, node_name: &str) -> Option<NodeConfig>;
}

/// In-memory `NodeConfigSource`, the default for tests and standalone runs.
#[derive(Clone, Debug, Default)]
pub struct StaticNodeConfigSource {
    configs: HashMap<String, NodeConfig>,
}

impl StaticNodeConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, node_name: impl Into<String>, config: NodeConfig) -> Self {
        self.configs.insert(node_name.into(), config);
        self
    }
}

impl NodeConfigSource for StaticNodeConfigSource {
    fn get(&self, node_name: &str) -> Option<NodeConfig> {
        self.configs.get(node_name).cloned()
    }
}
