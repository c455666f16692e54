//! Agent Controller - the turn loop of the memory agent
//!
//! Sends the conversation to the model, parses the completion, runs any code
//! in the sandbox, feeds the result back, and stops on a reply, on a fatal
//! error, or when the turn budget runs out.
//!
//! ```text
//! AwaitingModel ──► Parsing ──┬──► ExecutingCode ──► AwaitingModel
//!       ▲                     ├──► Replying ──► Done
//!       └── corrective note ──┤
//!                             └──► Failed (second parse failure in a row)
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::conversation::{with_filters, Conversation};
use super::prompt::{corrective_note, DEFAULT_SYSTEM_PROMPT};
use super::transcripts::{Transcript, TranscriptStore};
use crate::config::AgentConfig;
use crate::metrics::{AGENT_RUNS, AGENT_TURNS, MODEL_CALL_DURATION, PARSE_FAILURES};
use crate::model::{ChatMessage, ModelClient, ModelError};
use crate::parser::{parse_response, ParseError};
use crate::sandbox::{CodeExecutor, ExecutionResult, SandboxError};

/// Consecutive unparseable completions that end a run.
const MAX_CONSECUTIVE_PARSE_FAILURES: usize = 2;

/// Where a run is in the turn loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    AwaitingModel,
    Parsing,
    ExecutingCode,
    Replying,
    Done,
    Failed,
}

/// Caller-visible category of a failed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Model,
    TurnBudgetExhausted,
    MalformedOutput,
    Sandbox,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Model => "model",
            ErrorKind::TurnBudgetExhausted => "turn_budget_exhausted",
            ErrorKind::MalformedOutput => "malformed_output",
            ErrorKind::Sandbox => "sandbox",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for agent runs. Never an empty reply in disguise.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The model backend failed
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// The turn budget ran out before a reply
    #[error("turn budget exhausted after {turns} turns without a reply")]
    TurnBudgetExhausted { turns: usize },

    /// The model produced unparseable output twice in a row
    #[error("model output could not be parsed twice in a row: {0}")]
    MalformedOutput(ParseError),

    /// The sandbox itself could not run
    #[error("sandbox unavailable: {0}")]
    Sandbox(SandboxError),

    /// The caller cancelled the run
    #[error("run cancelled")]
    Cancelled,
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Model(_) => ErrorKind::Model,
            AgentError::TurnBudgetExhausted { .. } => ErrorKind::TurnBudgetExhausted,
            AgentError::MalformedOutput(_) => ErrorKind::MalformedOutput,
            AgentError::Sandbox(_) => ErrorKind::Sandbox,
            AgentError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Record of a single code execution
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    /// Turn that produced the code (1-based)
    pub turn: usize,
    pub code: String,
    pub result: ExecutionResult,
    pub duration_ms: f64,
}

/// Result of an agent run
#[derive(Debug, Clone)]
pub struct AgentResult {
    /// Final reply from the model
    pub reply: String,
    /// Reasoning that accompanied the reply
    pub reasoning: String,
    /// Number of model calls made
    pub turns: usize,
    /// Records of all code executions
    pub executions: Vec<ExecutionRecord>,
    /// Unique trace ID for this run
    pub trace_id: String,
    /// Full conversation, system prompt first
    pub conversation: Vec<ChatMessage>,
}

/// Mutable state of one run
struct Run {
    state: ControllerState,
    conversation: Conversation,
    turns: usize,
    executions: Vec<ExecutionRecord>,
}

impl Run {
    fn enter(&mut self, next: ControllerState) {
        debug!(from = ?self.state, to = ?next, turn = self.turns, "state transition");
        self.state = next;
    }
}

/// Agent Controller orchestrating the model and the sandbox
pub struct AgentController {
    model: Arc<dyn ModelClient>,
    executor: Arc<dyn CodeExecutor>,
    config: AgentConfig,
    transcripts: Option<TranscriptStore>,
}

impl AgentController {
    /// Create a new agent controller
    ///
    /// # Arguments
    /// * `model` - Model client for completions
    /// * `executor` - Sandbox for model-written code
    /// * `config` - Agent configuration
    pub fn new(model: Arc<dyn ModelClient>, executor: Arc<dyn CodeExecutor>, config: AgentConfig) -> Self {
        Self {
            model,
            executor,
            config,
            transcripts: None,
        }
    }

    /// Save a transcript of every finished run into `store`.
    pub fn with_transcripts(mut self, store: TranscriptStore) -> Self {
        self.transcripts = Some(store);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run the agent loop for one query
    pub async fn run(&self, query: &str, filters: &[String]) -> Result<AgentResult, AgentError> {
        self.run_with_cancel(query, filters, CancellationToken::new()).await
    }

    /// Run the agent loop, stopping with [`AgentError::Cancelled`] when `cancel` fires.
    ///
    /// Cancelling during an execution drops the executor future, which
    /// kills the worker process.
    pub async fn run_with_cancel(
        &self,
        query: &str,
        filters: &[String],
        cancel: CancellationToken,
    ) -> Result<AgentResult, AgentError> {
        let trace_id = Uuid::now_v7().to_string();
        let started_at = Utc::now();

        // Create root span for the entire run
        let root_span = info_span!(
            "agent_task",
            trace_id = %trace_id,
            model = %self.model.model_name(),
            filters = filters.len()
        );

        async {
            info!(trace_id = %trace_id, query = %query, "Starting agent task");

            let system_prompt = self
                .config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
            let mut run = Run {
                state: ControllerState::AwaitingModel,
                conversation: Conversation::new(system_prompt),
                turns: 0,
                executions: Vec::new(),
            };
            run.conversation.push_user(with_filters(query, filters));

            let outcome = self.drive(&mut run, &cancel).await;

            match &outcome {
                Ok(_) => run.enter(ControllerState::Done),
                Err(_) => run.enter(ControllerState::Failed),
            }
            let label = match &outcome {
                Ok(_) => "reply",
                Err(e) => e.kind().as_str(),
            };
            AGENT_RUNS.with_label_values(&[label]).inc();
            AGENT_TURNS.observe(run.turns as f64);

            match &outcome {
                Ok(_) => info!(turns = run.turns, executions = run.executions.len(), "Agent task complete"),
                Err(e) => warn!(turns = run.turns, kind = %e.kind(), error = %e, "Agent task failed"),
            }

            if let Some(store) = &self.transcripts {
                let transcript = Transcript {
                    id: trace_id.clone(),
                    query: query.to_string(),
                    model: self.model.model_name().to_string(),
                    started_at,
                    finished_at: Utc::now(),
                    messages: run.conversation.messages().to_vec(),
                    turns: run.turns,
                    outcome: label.to_string(),
                    error: outcome.as_ref().err().map(|e| e.to_string()),
                };
                match store.save(&transcript) {
                    Ok(path) => debug!(path = %path.display(), "transcript saved"),
                    Err(e) => warn!(error = %e, "failed to save transcript"),
                }
            }

            outcome.map(|(reply, reasoning)| AgentResult {
                reply,
                reasoning,
                turns: run.turns,
                executions: run.executions,
                trace_id: trace_id.clone(),
                conversation: run.conversation.into_messages(),
            })
        }
        .instrument(root_span)
        .await
    }

    /// The turn loop. Returns `(reply, reasoning)` on success.
    async fn drive(&self, run: &mut Run, cancel: &CancellationToken) -> Result<(String, String), AgentError> {
        let mut parse_failures = 0;

        loop {
            if run.turns >= self.config.max_turns {
                return Err(AgentError::TurnBudgetExhausted { turns: run.turns });
            }
            run.enter(ControllerState::AwaitingModel);
            run.turns += 1;
            let turn = run.turns;

            let llm_span = info_span!("llm_call", turn = turn, messages = run.conversation.len());
            let llm_start = Instant::now();
            let completion = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                completion = self.model.generate(run.conversation.messages()).instrument(llm_span) => completion?,
            };
            MODEL_CALL_DURATION.observe(llm_start.elapsed().as_secs_f64());
            debug!(turn, chars = completion.len(), "model responded");

            run.conversation.push_assistant(completion.as_str());
            run.enter(ControllerState::Parsing);

            let parsed = match parse_response(&completion) {
                Ok(parsed) => {
                    parse_failures = 0;
                    parsed
                }
                Err(e) => {
                    PARSE_FAILURES.inc();
                    parse_failures += 1;
                    warn!(turn, error = %e, consecutive = parse_failures, "unparseable model output");
                    if parse_failures >= MAX_CONSECUTIVE_PARSE_FAILURES {
                        return Err(AgentError::MalformedOutput(e));
                    }
                    run.conversation.push_user(corrective_note(&e));
                    continue;
                }
            };

            if let Some(reply) = parsed.reply {
                run.enter(ControllerState::Replying);
                return Ok((reply, parsed.reasoning));
            }

            let Some(code) = parsed.code else {
                // The parser guarantees one of reply/code.
                continue;
            };

            run.enter(ControllerState::ExecutingCode);
            info!(turn, lines = code.lines().count(), "executing code");
            let exec_start = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                result = self.executor.execute(&code) => result.map_err(AgentError::Sandbox)?,
            };
            let duration_ms = exec_start.elapsed().as_secs_f64() * 1000.0;
            info!(turn, status = result.status(), duration_ms, "execution complete");

            run.conversation.push_user(result.render_for_model());
            run.executions.push(ExecutionRecord {
                turn,
                code,
                result,
                duration_ms,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedModel {
        responses: Mutex<VecDeque<String>>,
    }

    impl ScriptedModel {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            })
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn generate(&self, _messages: &[ChatMessage]) -> Result<String, ModelError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ModelError::MalformedCompletion { detail: "script exhausted".into() })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    struct EchoExecutor;

    #[async_trait]
    impl CodeExecutor for EchoExecutor {
        async fn execute(&self, code: &str) -> Result<ExecutionResult, SandboxError> {
            Ok(ExecutionResult {
                stdout: format!("ran {} bytes\n", code.len()),
                ..ExecutionResult::default()
            })
        }
    }

    fn controller(model: Arc<ScriptedModel>) -> AgentController {
        AgentController::new(model, Arc::new(EchoExecutor), AgentConfig::default())
    }

    #[tokio::test]
    async fn test_code_then_reply() {
        let model = ScriptedModel::new(&[
            "<think>look</think><python>result = 1</python>",
            "<think>done</think><reply>Your name is Ada.</reply>",
        ]);
        let result = controller(model).run("What is my name?", &[]).await.unwrap();
        assert_eq!(result.reply, "Your name is Ada.");
        assert_eq!(result.reasoning, "done");
        assert_eq!(result.turns, 2);
        assert_eq!(result.executions.len(), 1);
        assert!(result.conversation[3].content.starts_with("<result>\nstdout:\nran 10 bytes"));
    }

    #[tokio::test]
    async fn test_one_parse_failure_is_recovered() {
        let model = ScriptedModel::new(&["no markers at all", "<think>ok</think><reply>fine</reply>"]);
        let result = controller(model).run("q", &[]).await.unwrap();
        assert_eq!(result.reply, "fine");
        assert!(result.conversation[3].content.contains("Format error"));
    }

    #[tokio::test]
    async fn test_two_parse_failures_fail() {
        let model = ScriptedModel::new(&["nope", "<think>a</think>", "<think>x</think><reply>late</reply>"]);
        let err = controller(model).run("q", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedOutput);
    }

    #[tokio::test]
    async fn test_model_error_is_fatal() {
        let model = ScriptedModel::new(&[]);
        let err = controller(model).run("q", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Model);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let model = ScriptedModel::new(&["<think>a</think><reply>b</reply>"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = controller(model).run_with_cancel("q", &[], cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(AgentError::TurnBudgetExhausted { turns: 20 }.kind().as_str(), "turn_budget_exhausted");
        assert_eq!(
            AgentError::Sandbox(SandboxError::Spawn { detail: "x".into() }).kind(),
            ErrorKind::Sandbox
        );
    }
}
