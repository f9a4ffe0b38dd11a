//! Recursive `${...}` substitution over tool inputs: `${action_<timestamp>}`
//! pulls a prior tool's output out of `full_action_data`; any other path is a
//! dotted lookup via [`RuntimeState::extract_data_by_path`].

use serde_json::Value;
use tracing::{info, warn};

use crate::checkpoint::is_action_id;
use crate::state::RuntimeState;

/// Recursively walks `obj`, replacing every `${...}` marker found in string
/// values. Dicts and lists are walked in place; other scalar types pass through.
pub fn replace_data_markers(obj: &Value, state: &RuntimeState) -> Value {
    match obj {
        Value::String(s) => Value::String(replace_markers_in_string(s, state)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), replace_data_markers(v, state)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| replace_data_markers(v, state)).collect())
        }
        other => other.clone(),
    }
}

fn replace_markers_in_string(input: &str, state: &RuntimeState) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after_marker = &rest[start + 2..];
        match after_marker.find('}') {
            Some(end) => {
                let path = &after_marker[..end];
                out.push_str(&resolve_path(path, state));
                rest = &after_marker[end + 1..];
            }
            None => {
                // Unterminated marker: emit the rest verbatim, as the original does.
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve_path(path: &str, state: &RuntimeState) -> String {
    if is_action_id(path) {
        return match state.get_full_action_data(path) {
            Some(record) => {
                info!(path, "resolved action_id reference");
                record
                    .tool_output
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "null".to_string())
            }
            None => {
                warn!(path, "could not find action_id reference");
                format!("[数据提取失败: {path}]")
            }
        };
    }

    match state.extract_data_by_path(path) {
        Some(Value::String(s)) => {
            info!(path, "resolved string data reference");
            s
        }
        Some(other) => {
            info!(path, "resolved non-string data reference");
            other.to_string()
        }
        None => {
            warn!(path, "could not resolve data reference");
            format!("[数据提取失败: {path}]")
        }
    }
}
