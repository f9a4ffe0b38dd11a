//! `ModelForNode`/`ToolConfig`/`ValidateModel`: the strict cascade a node
//! handler uses to resolve which model (and config) to run with.

use std::collections::HashMap;
use std::collections::HashSet;

use serde_json::Value;
use tracing::{info, warn};

use super::node_config::{NodeConfig, NodeConfigSource};

/// In-memory per-task overrides, keyed by node/tool name — the "graph runtime
/// map" a task's caller may supply to override persisted config for this run
/// only.
pub type RuntimeMap = HashMap<String, NodeConfig>;

pub struct ModelConfigResolver {
    persisted: Box<dyn NodeConfigSource>,
}

impl ModelConfigResolver {
    /// Loads `.env`/XDG config (so `WEFT_DEFAULT_MODEL` and friends are in the
    /// process environment before the cascade ever reads them) and wraps
    /// `persisted` as the resolver's middle layer.
    pub fn new(persisted: Box<dyn NodeConfigSource>) -> Self {
        if let Err(e) = env_config::load_and_apply("weft", None) {
            warn!(error = %e, "failed to load .env/XDG config, falling back to process environment only");
        }
        Self { persisted }
    }

    /// Cascade: explicit override -> runtime map -> persisted config ->
    /// `WEFT_DEFAULT_MODEL` env var -> `None`.
    pub fn model_for_node(
        &self,
        node_name: &str,
        runtime_map: Option<&RuntimeMap>,
        override_model: Option<&str>,
    ) -> Option<String> {
        if let Some(model) = override_model {
            info!(node_name, model, "model resolved via explicit override");
            return Some(model.to_string());
        }

        if let Some(model) = runtime_map
            .and_then(|m| m.get(node_name))
            .and_then(|c| c.model_name.clone())
        {
            info!(node_name, model = %model, "model resolved via runtime map");
            return Some(model);
        }

        if let Some(model) = self.persisted.get(node_name).and_then(|c| c.model_name) {
            info!(node_name, model = %model, "model resolved via persisted config");
            return Some(model);
        }

        match std::env::var("WEFT_DEFAULT_MODEL") {
            Ok(model) if !model.is_empty() => {
                info!(node_name, model = %model, "model resolved via default env var");
                Some(model)
            }
            _ => {
                warn!(node_name, "no model configuration found for node");
                None
            }
        }
    }

    /// Merges the runtime map's config over persisted config, ensuring a
    /// `model_name` key is always present (possibly `null`).
    pub fn tool_config(&self, node_name: &str, runtime_map: Option<&RuntimeMap>) -> Value {
        let mut merged = serde_json::Map::new();

        if let Some(persisted) = self.persisted.get(node_name) {
            merged.insert(
                "model_name".to_string(),
                persisted.model_name.clone().map(Value::String).unwrap_or(Value::Null),
            );
            for (k, v) in persisted.extra {
                merged.insert(k, v);
            }
        }

        if let Some(runtime) = runtime_map.and_then(|m| m.get(node_name)) {
            if let Some(model) = &runtime.model_name {
                merged.insert("model_name".to_string(), Value::String(model.clone()));
            }
            for (k, v) in runtime.extra.clone() {
                merged.insert(k, v);
            }
        }

        merged.entry("model_name").or_insert(Value::Null);
        Value::Object(merged)
    }
}

/// Confirms a model id is registered. Implementations must tolerate
/// datastore errors by returning `false` rather than propagating.
pub trait ModelCatalog: Send + Sync {
    fn exists(&self, model_id: &str) -> bool;
}

#[derive(Clone, Debug, Default)]
pub struct StaticModelCatalog {
    known: HashSet<String>,
}

impl StaticModelCatalog {
    pub fn new(known: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            known: known.into_iter().map(Into::into).collect(),
        }
    }
}

impl ModelCatalog for StaticModelCatalog {
    fn exists(&self, model_id: &str) -> bool {
        self.known.contains(model_id)
    }
}

pub fn validate_model(catalog: &dyn ModelCatalog, model_id: &str) -> bool {
    catalog.exists(model_id)
}
