//! LLM client abstraction for structured node output.
//!
//! Node handlers (planner, reflection, output selector) don't talk to a chat
//! API directly; they hold a `StructuredLlm`, constructed once per node call
//! with the schema and model config already bound, and call `invoke` to get
//! back one schema-shaped JSON value. Transport, tool-function-calling or
//! JSON-mode, and schema validation are the implementation's job — this
//! generalizes the "chat completion" vocabulary this crate's LLM client has
//! always used into "typed structured output".

mod mock;

use async_trait::async_trait;
use thiserror::Error;

/// Token usage for one LLM call, when the backend reports it.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Clone, Debug)]
pub struct StructuredLlmResponse {
    /// The schema-shaped JSON value the model produced.
    pub value: serde_json::Value,
    pub usage: Option<LlmUsage>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm transport error: {0}")]
    Transport(String),
    #[error("llm response did not match the expected schema: {0}")]
    SchemaMismatch(String),
}

/// One structured call: a user prompt and a system prompt in, one schema
/// instance out. The schema and model id are bound at construction time by
/// whatever builds the `StructuredLlm` (see `GetStructuredLLM` in the
/// external-interfaces design), not passed per call.
#[async_trait]
pub trait StructuredLlm: Send + Sync {
    async fn invoke(
        &self,
        user_prompt: &str,
        system_prompt: &str,
    ) -> Result<StructuredLlmResponse, LlmError>;
}

pub use mock::MockStructuredLlm;
