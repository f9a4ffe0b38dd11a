//! System prompts for the planner/reflection/output-selector nodes.
//!
//! Canonical default text is embedded from `weft/prompts/nodes.yaml` at
//! compile time (see [`load::default_from_embedded`]); an operator can
//! override it without a rebuild by pointing `PROMPTS_DIR` at a directory
//! containing a `nodes.yaml` of the same shape, or by setting the
//! corresponding `WEFT_<NODE>_SYSTEM_PROMPT` environment variable.

mod load;

pub use load::{default_from_embedded, load, load_or_default, LoadError};

use serde::Deserialize;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NodePrompt {
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PromptSet {
    #[serde(default)]
    pub planner: NodePrompt,
    #[serde(default)]
    pub reflection: NodePrompt,
    #[serde(default)]
    pub output_selector: NodePrompt,
}
