//! Sandbox Executor
//!
//! Runs one snippet in a fresh child process with only the Tool API (bound
//! to the memory root) reachable.
//!
//! # Architecture
//!
//! ```text
//! AgentController ── execute(code) ──► SandboxExecutor (host)
//!                                          │ 1. scan: denied capabilities?
//!                                          │ 2. spawn recall-sandbox
//!                                          ▼
//!                                   ┌──────────────────────────┐
//!                                   │ worker process           │
//!                                   │  rlimits, no caps,       │
//!                                   │  seccomp                 │
//!                                   │  interpreter + ToolApi   │
//!                                   └────────────┬─────────────┘
//!                                                │ JSON lines
//!                                          ◄─────┘
//!                                   ExecutionResult
//! ```

pub mod executor;
pub mod output;
pub mod policy;
pub mod protocol;
pub mod worker;

pub use executor::{locate_worker, SandboxExecutor, WORKER_BINARY};
pub use output::LimitedBuffer;
pub use policy::{Capability, CapabilityPolicy, Denial};
pub use protocol::{SafeValue, WorkerEvent, WorkerRequest, SCHEMA_VERSION};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tools::ToolError;

/// Failures of the sandbox itself, as opposed to the snippet's own errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SandboxError {
    #[error("CapabilityDenied: '{identifier}' requires the denied capability '{capability}'")]
    CapabilityDenied {
        capability: Capability,
        identifier: String,
    },

    #[error("Timeout: execution exceeded {seconds}s and was terminated")]
    Timeout { seconds: u64 },

    #[error("Unserializable: {detail}")]
    Unserializable { detail: String },

    #[error("Crashed: {detail}")]
    Crashed { detail: String },

    #[error("Protocol: {detail}")]
    Protocol { detail: String },

    /// The worker could not be started at all. Infrastructure failure.
    #[error("Spawn: {detail}")]
    Spawn { detail: String },
}

impl SandboxError {
    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            SandboxError::CapabilityDenied { .. } => "denied",
            SandboxError::Timeout { .. } => "timeout",
            SandboxError::Unserializable { .. } => "unserializable",
            SandboxError::Crashed { .. } => "crashed",
            SandboxError::Protocol { .. } => "protocol",
            SandboxError::Spawn { .. } => "spawn",
        }
    }
}

/// Why an execution did not complete normally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "source", content = "fault", rename_all = "snake_case")]
pub enum ExecutionFault {
    #[error("{0}")]
    Sandbox(SandboxError),
    #[error("{0}")]
    Tool(ToolError),
}

impl From<SandboxError> for ExecutionFault {
    fn from(e: SandboxError) -> Self {
        ExecutionFault::Sandbox(e)
    }
}

impl From<ToolError> for ExecutionFault {
    fn from(e: ToolError) -> Self {
        ExecutionFault::Tool(e)
    }
}

/// Outcome of one snippet execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Everything the snippet printed (capped)
    pub stdout: String,
    /// The result variable, if the snippet assigned it
    pub value: Option<SafeValue>,
    pub error: Option<ExecutionFault>,
    /// Script errors (NameError, TypeError, ...) as text for the model
    pub diagnostics: Option<String>,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn failed(error: impl Into<ExecutionFault>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Completed with no sandbox/tool error and no script error.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.diagnostics.is_none() && !self.timed_out
    }

    /// Label used for the executions metric.
    pub fn status(&self) -> &'static str {
        match (&self.error, &self.diagnostics) {
            _ if self.timed_out => "timeout",
            (Some(ExecutionFault::Sandbox(e)), _) => e.label(),
            (Some(ExecutionFault::Tool(_)), _) => "tool_error",
            (None, Some(_)) => "script_error",
            (None, None) => "success",
        }
    }

    /// The `<result>` block fed back to the model as the next user turn.
    pub fn render_for_model(&self) -> String {
        let mut out = String::from("<result>\nstdout:\n");
        out.push_str(&self.stdout);
        if !self.stdout.is_empty() && !self.stdout.ends_with('\n') {
            out.push('\n');
        }

        out.push_str("result: ");
        match &self.value {
            Some(value) => out.push_str(&value.to_json()),
            None => out.push_str("None"),
        }
        out.push('\n');

        if let Some(error) = &self.error {
            out.push_str(&format!("error: {}\n", error));
        }
        if let Some(diagnostics) = &self.diagnostics {
            out.push_str(&format!("diagnostics: {}\n", diagnostics.trim_end()));
        }
        if self.timed_out {
            out.push_str("timed_out: true\n");
        }
        out.push_str("</result>");
        out
    }
}

/// Something that can run a snippet. The controller only knows this trait.
///
/// `Err` is reserved for infrastructure failures (the worker cannot be
/// started); everything the snippet does wrong comes back inside the
/// [`ExecutionResult`]. Dropping the returned future must terminate any
/// child process it started.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, code: &str) -> Result<ExecutionResult, SandboxError>;
}
