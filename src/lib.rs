//! recall - a memory agent that works through sandboxed code
//!
//! A language model answers questions by reading and writing a markdown
//! knowledge base. It does so by emitting short snippets of code, which run
//! in a confined child process with only the Tool API bound to the memory
//! directory.
//!
//! # Modules
//!
//! - `parser` - Output Parser for `<think>`/`<python>`/`<reply>` markers
//! - `tools` - Sandboxed Tool API over the memory root
//! - `script` - interpreter for the snippet language the model writes
//! - `sandbox` - Sandbox Executor (host) and worker (child process)
//! - `security` - rlimits, capability dropping, seccomp for the worker
//! - `model` - Model Client contract and the Ollama client
//! - `agent` - Conversation Controller
//! - `config` - `AgentConfig` / `SandboxConfig`
//! - `metrics` - Prometheus metrics for observability
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use recall::{AgentConfig, AgentController, MemoryRoot, OllamaClient, SandboxExecutor};
//!
//! let config = AgentConfig::from_env()?;
//! let root = MemoryRoot::create(&config.memory_root)?;
//! let executor = SandboxExecutor::new(&root, config.sandbox.clone())?;
//! let model = OllamaClient::new(&config.ollama_url, &config.model);
//! let agent = AgentController::new(Arc::new(model), Arc::new(executor), config);
//!
//! let result = agent.run("What is my name?", &[]).await?;
//! println!("{}", result.reply);
//! ```

pub mod agent;
pub mod config;
pub mod metrics;
pub mod model;
pub mod parser;
pub mod sandbox;
pub mod script;
pub mod security;
pub mod tools;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentController, AgentError, AgentResult, ErrorKind};
pub use config::{AgentConfig, SandboxConfig};
pub use model::{ChatMessage, ModelClient, ModelError, OllamaClient};
pub use parser::{parse_response, ParseError, ParsedResponse};
pub use sandbox::{CodeExecutor, ExecutionResult, SandboxError, SandboxExecutor};
pub use tools::{MemoryRoot, SizeLimits, ToolApi, ToolError};
