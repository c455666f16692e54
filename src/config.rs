//! Runtime configuration
//!
//! Defaults live in the `Default` impls. [`AgentConfig::from_env`] layers
//! `RECALL_*` environment variables on top; the CLI layers its flags on top
//! of that.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::sandbox::Capability;
use crate::tools::SizeLimits;

pub const ENV_MODEL: &str = "RECALL_MODEL";
pub const ENV_OLLAMA_URL: &str = "RECALL_OLLAMA_URL";
pub const ENV_MEMORY_PATH: &str = "RECALL_MEMORY_PATH";
pub const ENV_MAX_TURNS: &str = "RECALL_MAX_TURNS";
pub const ENV_SANDBOX_TIMEOUT: &str = "RECALL_SANDBOX_TIMEOUT";
pub const ENV_SANDBOX_WORKER: &str = "RECALL_SANDBOX_WORKER";
pub const ENV_TRANSCRIPT_DIR: &str = "RECALL_TRANSCRIPT_DIR";

/// A configuration value that could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Configuration for the sandbox executor
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Wall-clock limit per execution
    pub timeout_seconds: u64,
    /// Capabilities snippets may not use
    pub denied_capabilities: Vec<Capability>,
    /// Write budgets for the memory directory
    pub limits: SizeLimits,
    /// Address-space limit of the worker (0 disables it)
    pub memory_limit_bytes: u64,
    /// Cap on captured stdout per execution
    pub max_output_bytes: u64,
    /// Variable whose final value is returned
    pub result_variable: String,
    /// Worker binary; found next to the current executable if unset
    pub worker_path: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 20,
            denied_capabilities: Capability::ALL.to_vec(),
            limits: SizeLimits::default(),
            memory_limit_bytes: 512 * 1024 * 1024,
            max_output_bytes: 64 * 1024,
            result_variable: "result".to_string(),
            worker_path: None,
        }
    }
}

/// Configuration for the agent controller
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model to use for Ollama (e.g., "qwen3")
    pub model: String,
    /// Ollama base URL
    pub ollama_url: String,
    /// Maximum number of model calls before giving up
    pub max_turns: usize,
    /// Custom system prompt (uses the built-in one if None)
    pub system_prompt: Option<String>,
    /// The agent's memory directory
    pub memory_root: PathBuf,
    pub sandbox: SandboxConfig,
    /// Where to save run transcripts, if anywhere
    pub transcript_dir: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "qwen3".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            max_turns: 20,
            system_prompt: None,
            memory_root: PathBuf::from("memory"),
            sandbox: SandboxConfig::default(),
            transcript_dir: None,
        }
    }
}

impl AgentConfig {
    /// Defaults overridden by any `RECALL_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(model) = lookup(ENV_MODEL) {
            config.model = model;
        }
        if let Some(url) = lookup(ENV_OLLAMA_URL) {
            config.ollama_url = url.trim_end_matches('/').to_string();
        }
        if let Some(path) = lookup(ENV_MEMORY_PATH) {
            config.memory_root = PathBuf::from(path);
        }
        if let Some(value) = lookup(ENV_MAX_TURNS) {
            config.max_turns = parse_positive(ENV_MAX_TURNS, &value)?;
        }
        if let Some(value) = lookup(ENV_SANDBOX_TIMEOUT) {
            config.sandbox.timeout_seconds = parse_positive(ENV_SANDBOX_TIMEOUT, &value)?;
        }
        if let Some(path) = lookup(ENV_SANDBOX_WORKER) {
            config.sandbox.worker_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup(ENV_TRANSCRIPT_DIR) {
            config.transcript_dir = Some(PathBuf::from(path));
        }

        Ok(config)
    }
}

fn parse_positive<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let invalid = |reason: String| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason,
    };
    let parsed = value.trim().parse::<T>().map_err(|e| invalid(e.to_string()))?;
    if parsed <= T::default() {
        return Err(invalid("must be greater than zero".to_string()));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.max_turns, 20);
        assert_eq!(config.sandbox.timeout_seconds, 20);
        assert_eq!(config.sandbox.result_variable, "result");
        assert_eq!(config.sandbox.denied_capabilities.len(), Capability::ALL.len());
    }

    #[test]
    fn test_env_overrides() {
        let config = AgentConfig::from_lookup(lookup(&[
            (ENV_MODEL, "llama3.2"),
            (ENV_OLLAMA_URL, "http://gpu:11434/"),
            (ENV_MAX_TURNS, "5"),
            (ENV_SANDBOX_TIMEOUT, "3"),
            (ENV_MEMORY_PATH, "/data/memory"),
        ]))
        .unwrap();
        assert_eq!(config.model, "llama3.2");
        assert_eq!(config.ollama_url, "http://gpu:11434");
        assert_eq!(config.max_turns, 5);
        assert_eq!(config.sandbox.timeout_seconds, 3);
        assert_eq!(config.memory_root, PathBuf::from("/data/memory"));
        assert!(config.transcript_dir.is_none());
    }

    #[test]
    fn test_bad_values_rejected() {
        let err = AgentConfig::from_lookup(lookup(&[(ENV_MAX_TURNS, "many")])).unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_TURNS));
        assert!(AgentConfig::from_lookup(lookup(&[(ENV_SANDBOX_TIMEOUT, "0")])).is_err());
    }
}
