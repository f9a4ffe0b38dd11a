use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::tool::{Tool, ToolCategory};

#[derive(Clone, Debug, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
}

/// Name-keyed tool resolver. Holds tools behind `Arc` so the same registry
/// can be shared across concurrently-running tasks.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Lists tools, optionally filtered to one category. `generator` tools are
    /// excluded when listing for the planner; callers that want them ask for
    /// `Some(ToolCategory::Generator)` explicitly (the output selector does).
    pub fn list(&self, category: Option<ToolCategory>) -> Vec<ToolDescriptor> {
        let mut tools: Vec<ToolDescriptor> = self
            .tools
            .values()
            .filter(|t| category.map(|c| c == t.category()).unwrap_or(true))
            .map(|t| ToolDescriptor {
                name: t.name().to_string(),
                description: t.description().to_string(),
                category: t.category(),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Tools the planner may call: every category except `generator`.
    pub fn planner_tools(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<ToolDescriptor> = self
            .tools
            .values()
            .filter(|t| t.category() != ToolCategory::Generator)
            .map(|t| ToolDescriptor {
                name: t.name().to_string(),
                description: t.description().to_string(),
                category: t.category(),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Output (`generator`) tools, sorted ascending by name — the deterministic
    /// fallback order the output selector uses when the LLM's pick is unusable.
    pub fn generator_tools(&self) -> Vec<ToolDescriptor> {
        self.list(Some(ToolCategory::Generator))
    }
}
