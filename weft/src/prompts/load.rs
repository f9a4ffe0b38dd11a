//! Load node system prompts from a directory and apply env overrides.
//!
//! **Canonical source**: default prompt text lives in `weft/prompts/nodes.yaml`,
//! embedded at compile time and used when no `PROMPTS_DIR` or directory is
//! present.

use std::path::Path;

use super::PromptSet;

const EMBED_NODES: &str = include_str!("../../prompts/nodes.yaml");
const NODES_FILE: &str = "nodes.yaml";
const DEFAULT_PROMPTS_DIR: &str = "prompts";

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("prompts directory not found or not readable: {0}")]
    DirNotFound(String),
    #[error("failed to read prompts file {path}: {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse YAML in {path}: {message}")]
    ParseYaml { path: String, message: String },
}

fn prompts_dir(dir: Option<&Path>) -> std::path::PathBuf {
    dir.map(std::path::PathBuf::from).unwrap_or_else(|| {
        std::env::var("PROMPTS_DIR")
            .ok()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| std::path::PathBuf::from(DEFAULT_PROMPTS_DIR))
    })
}

fn apply_env_overrides(mut prompts: PromptSet) -> PromptSet {
    if let Ok(s) = std::env::var("WEFT_PLANNER_SYSTEM_PROMPT") {
        prompts.planner.system_prompt = Some(s);
    }
    if let Ok(s) = std::env::var("WEFT_REFLECTION_SYSTEM_PROMPT") {
        prompts.reflection.system_prompt = Some(s);
    }
    if let Ok(s) = std::env::var("WEFT_OUTPUT_SELECTOR_SYSTEM_PROMPT") {
        prompts.output_selector.system_prompt = Some(s);
    }
    prompts
}

/// Loads `nodes.yaml` from `dir` (or `PROMPTS_DIR`, or `./prompts`), applying
/// env overrides. Errors only when the directory is missing or the file
/// fails to parse; a missing file within an existing directory is not an error
/// (code defaults apply through [`PromptSet`]'s `Default`).
pub fn load(dir: Option<&Path>) -> Result<PromptSet, LoadError> {
    let base = prompts_dir(dir);
    if !base.exists() || !base.is_dir() {
        return Err(LoadError::DirNotFound(base.display().to_string()));
    }

    let path = base.join(NODES_FILE);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(apply_env_overrides(PromptSet::default()));
        }
        Err(e) => {
            return Err(LoadError::ReadFile {
                path: path.display().to_string(),
                message: e.to_string(),
            })
        }
    };

    let prompts: PromptSet = serde_yaml::from_str(&content).map_err(|e| LoadError::ParseYaml {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    Ok(apply_env_overrides(prompts))
}

/// Parses the embedded default `nodes.yaml`, applying env overrides.
pub fn default_from_embedded() -> PromptSet {
    let prompts: PromptSet = serde_yaml::from_str(EMBED_NODES).unwrap_or_default();
    apply_env_overrides(prompts)
}

/// Loads from `dir` if present; otherwise falls back to the embedded default.
pub fn load_or_default(dir: Option<&Path>) -> PromptSet {
    load(dir).unwrap_or_else(|_| default_from_embedded())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: a non-existent directory is a hard error from `load`.
    #[test]
    fn load_nonexistent_dir_returns_error() {
        let result = load(Some(Path::new("/nonexistent_prompts_dir_12345")));
        assert!(matches!(result.unwrap_err(), LoadError::DirNotFound(_)));
    }

    /// **Scenario**: `load_or_default` falls back to the embedded default,
    /// whose planner prompt is non-empty.
    #[test]
    fn load_or_default_nonexistent_returns_embedded_default() {
        let prompts = load_or_default(Some(Path::new("/nonexistent_prompts_dir_12345")));
        assert!(prompts.planner.system_prompt.unwrap().contains("规划"));
    }

    /// **Scenario**: a directory with its own `nodes.yaml` overrides the embedded text.
    #[test]
    fn load_from_dir_overrides_embedded() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("nodes.yaml"),
            "planner:\n  system_prompt: \"custom planner prompt\"\n",
        )
        .unwrap();
        let prompts = load(Some(temp.path())).unwrap();
        assert_eq!(prompts.planner.system_prompt.as_deref(), Some("custom planner prompt"));
    }

    /// **Scenario**: an existing directory with no `nodes.yaml` falls through
    /// to code defaults (`Default::default()`, all `None`), not an error.
    #[test]
    fn load_missing_file_in_existing_dir_yields_defaults() {
        let temp = tempfile::TempDir::new().unwrap();
        let prompts = load(Some(temp.path())).unwrap();
        assert!(prompts.planner.system_prompt.is_none());
    }
}
