//! A canned-response `StructuredLlm` for node-handler and executor tests,
//! mirroring the request/response vocabulary of this crate's LLM client.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{LlmError, StructuredLlm, StructuredLlmResponse};

pub struct MockStructuredLlm {
    responses: Mutex<Vec<Value>>,
    calls: Mutex<usize>,
}

impl MockStructuredLlm {
    /// `responses` are fed out in order, one per `invoke` call.
    pub fn new(responses: Vec<Value>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().expect("mock llm mutex poisoned")
    }
}

#[async_trait]
impl StructuredLlm for MockStructuredLlm {
    async fn invoke(
        &self,
        _user_prompt: &str,
        _system_prompt: &str,
    ) -> Result<StructuredLlmResponse, LlmError> {
        let mut calls = self.calls.lock().expect("mock llm mutex poisoned");
        let mut responses = self.responses.lock().expect("mock llm mutex poisoned");
        if responses.is_empty() {
            return Err(LlmError::Transport("mock llm has no more canned responses".into()));
        }
        *calls += 1;
        Ok(StructuredLlmResponse {
            value: responses.remove(0),
            usage: None,
        })
    }
}
