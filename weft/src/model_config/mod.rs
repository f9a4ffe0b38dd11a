//! Model/tool configuration resolution: a strict override → runtime map →
//! persisted config → env var cascade, plus model-id validation.

mod node_config;
mod resolver;

pub use node_config::{NodeConfig, NodeConfigSource, StaticNodeConfigSource};
pub use resolver::{
    validate_model, ModelCatalog, ModelConfigResolver, RuntimeMap, StaticModelCatalog,
};
