//! Retry & recovery around output-tool execution (SPEC §4.7): capped
//! exponential backoff on transient errors, immediate abort on auth/validation
//! failures, and one fallback attempt against an alternative generator tool
//! not yet tried in this task once the primary tool's attempts are exhausted.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::nodes::NodeContext;
use crate::state::RetryHistoryEntry;
use crate::tools::{ToolOutput, ToolStatus};

const BASE_DELAY_MS: u64 = 1000;
const MAX_DELAY_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Network,
    Timeout,
    RateLimit,
    Server,
    Auth,
    Validation,
    Unknown,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorClass::Auth | ErrorClass::Validation)
    }
}

/// Pattern-matches an error message into one of the categories §4.7 names.
/// Auth/validation abort immediately; everything else is treated as
/// transient and retried.
pub fn classify_error(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if lower.contains("unauthorized") || lower.contains("forbidden") || lower.contains("auth") {
        ErrorClass::Auth
    } else if lower.contains("invalid") || lower.contains("validation") || lower.contains("schema") {
        ErrorClass::Validation
    } else if lower.contains("rate limit") || lower.contains("too many requests") {
        ErrorClass::RateLimit
    } else if lower.contains("timeout") || lower.contains("timed out") {
        ErrorClass::Timeout
    } else if lower.contains("network") || lower.contains("connection") {
        ErrorClass::Network
    } else if lower.contains("server error") || lower.contains("internal server") || lower.contains("502") || lower.contains("503") {
        ErrorClass::Server
    } else {
        ErrorClass::Unknown
    }
}

/// `delay * 2^(attempt-1)`, capped at 30s, base delay 1s.
pub fn backoff_delay_ms(attempt: u32) -> u64 {
    let raw = BASE_DELAY_MS.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    raw.min(MAX_DELAY_MS)
}

pub struct RecoveryOutcome {
    pub output: ToolOutput,
    pub tool_name: String,
    pub retry_history: Vec<RetryHistoryEntry>,
    pub recovered_via_fallback: bool,
}

pub struct RecoveryFailure {
    pub retry_history: Vec<RetryHistoryEntry>,
    pub error_details: Value,
}

/// Runs `tool_name` with up to `max_attempts`, retrying transient failures
/// with backoff. On exhaustion, tries exactly one alternative generator tool
/// not already present in `already_tried`.
pub async fn run_output_tool_with_recovery(
    tool_name: &str,
    inputs: &Value,
    ctx: &NodeContext,
    max_attempts: u32,
    already_tried: &mut Vec<String>,
) -> Result<RecoveryOutcome, RecoveryFailure> {
    let mut retry_history = Vec::new();

    if let Some(output) = attempt_tool(tool_name, inputs, ctx, max_attempts, &mut retry_history).await {
        already_tried.push(tool_name.to_string());
        return Ok(RecoveryOutcome {
            output,
            tool_name: tool_name.to_string(),
            retry_history,
            recovered_via_fallback: false,
        });
    }
    already_tried.push(tool_name.to_string());

    let alternative = ctx
        .tools
        .generator_tools()
        .into_iter()
        .find(|t| !already_tried.contains(&t.name));

    if let Some(alt) = alternative {
        warn!(original = tool_name, fallback = %alt.name, "output tool exhausted, trying alternative generator");
        if let Some(output) = attempt_tool(&alt.name, inputs, ctx, 1, &mut retry_history).await {
            let name = alt.name.clone();
            already_tried.push(name.clone());
            return Ok(RecoveryOutcome {
                output,
                tool_name: name,
                retry_history,
                recovered_via_fallback: true,
            });
        }
        already_tried.push(alt.name);
    }

    Err(RecoveryFailure {
        error_details: json!({
            "tool_name": tool_name,
            "attempts": retry_history.len(),
            "last_error": retry_history.last().map(|e| e.error_message.clone()),
        }),
        retry_history,
    })
}

async fn attempt_tool(
    tool_name: &str,
    inputs: &Value,
    ctx: &NodeContext,
    max_attempts: u32,
    retry_history: &mut Vec<RetryHistoryEntry>,
) -> Option<ToolOutput> {
    let Some(tool) = ctx.tools.get(tool_name) else {
        retry_history.push(RetryHistoryEntry {
            attempt: 1,
            tool_name: tool_name.to_string(),
            error_type: "not_found".to_string(),
            error_message: format!("tool not registered: {tool_name}"),
            execution_time_ms: 0,
            timestamp: chrono::Utc::now(),
        });
        return None;
    };

    for attempt in 1..=max_attempts {
        let start = std::time::Instant::now();
        let result = tool.execute(inputs.clone()).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let message = match &result {
            Ok(output) if output.status == Some(ToolStatus::Success) => {
                info!(tool_name, attempt, elapsed_ms, "output tool succeeded");
                return Some(output.clone());
            }
            Ok(output) => output.message.clone().unwrap_or_default(),
            Err(e) => e.to_string(),
        };

        let class = classify_error(&message);
        retry_history.push(RetryHistoryEntry {
            attempt,
            tool_name: tool_name.to_string(),
            error_type: format!("{class:?}"),
            error_message: message,
            execution_time_ms: elapsed_ms,
            timestamp: chrono::Utc::now(),
        });

        if !class.is_retryable() || attempt == max_attempts {
            return None;
        }

        tokio::time::sleep(Duration::from_millis(backoff_delay_ms(attempt))).await;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockStructuredLlm;
    use crate::model_config::{ModelConfigResolver, StaticNodeConfigSource};
    use crate::tools::{Tool, ToolCategory, ToolError, ToolRegistry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn auth_and_validation_are_not_retryable() {
        assert!(!classify_error("401 unauthorized").is_retryable());
        assert!(!classify_error("validation failed: missing field").is_retryable());
        assert!(classify_error("network timeout").is_retryable());
    }

    #[test]
    fn backoff_caps_at_thirty_seconds() {
        assert_eq!(backoff_delay_ms(1), 1000);
        assert_eq!(backoff_delay_ms(2), 2000);
        assert_eq!(backoff_delay_ms(6), 30_000);
        assert_eq!(backoff_delay_ms(20), 30_000);
    }

    struct AlwaysSucceeds;
    #[async_trait]
    impl Tool for AlwaysSucceeds {
        fn name(&self) -> &str {
            "ReportGenerator"
        }
        fn description(&self) -> &str {
            "stub"
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::Generator
        }
        fn input_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, _inputs: Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::success(json!("report")))
        }
    }

    struct AuthFails;
    #[async_trait]
    impl Tool for AuthFails {
        fn name(&self) -> &str {
            "TextGenerator"
        }
        fn description(&self) -> &str {
            "stub"
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::Generator
        }
        fn input_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, _inputs: Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::failed("401 unauthorized"))
        }
    }

    struct CountingFailer(Arc<AtomicU32>);
    #[async_trait]
    impl Tool for CountingFailer {
        fn name(&self) -> &str {
            "TextGenerator"
        }
        fn description(&self) -> &str {
            "stub"
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::Generator
        }
        fn input_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, _inputs: Value) -> Result<ToolOutput, ToolError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ToolOutput::failed("network connection reset"))
        }
    }

    fn ctx(tools: ToolRegistry) -> NodeContext {
        NodeContext {
            llm: Arc::new(MockStructuredLlm::new(vec![])),
            tools: Arc::new(tools),
            model_config: Arc::new(ModelConfigResolver::new(Box::new(StaticNodeConfigSource::new()))),
        }
    }

    /// **Scenario**: a validation/auth failure aborts without exhausting attempts
    /// and without sleeping, falling straight to the alternative generator.
    #[tokio::test]
    async fn auth_failure_falls_back_to_alternative_immediately() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(AuthFails));
        registry.register(Arc::new(AlwaysSucceeds));
        let context = ctx(registry);
        let mut tried = Vec::new();
        let outcome = run_output_tool_with_recovery("TextGenerator", &json!({}), &context, 3, &mut tried)
            .await
            .expect("alternative should succeed");
        assert_eq!(outcome.tool_name, "ReportGenerator");
        assert!(outcome.recovered_via_fallback);
    }

    /// **Scenario** (S3, output-tool retry+fallback): when no alternative is
    /// registered, exhaustion surfaces accumulated retry_history and error_details.
    #[tokio::test]
    async fn exhaustion_with_no_alternative_returns_failure() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CountingFailer(counter.clone())));
        let context = ctx(registry);
        let mut tried = Vec::new();
        let failure = run_output_tool_with_recovery("TextGenerator", &json!({}), &context, 2, &mut tried)
            .await
            .unwrap_err();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(failure.retry_history.len(), 2);
        assert!(failure.error_details.get("tool_name").is_some());
    }

    /// **Scenario**: a tool name not in the registry fails immediately with a
    /// `not_found` retry-history entry, no panic.
    #[tokio::test]
    async fn unregistered_tool_is_a_clean_failure() {
        let context = ctx(ToolRegistry::new());
        let mut tried = Vec::new();
        let failure = run_output_tool_with_recovery("Ghost", &json!({}), &context, 3, &mut tried)
            .await
            .unwrap_err();
        assert_eq!(failure.retry_history[0].error_type, "not_found");
    }
}
