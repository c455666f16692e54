//! Integration tests for the agent system
//!
//! These tests drive the controller with a scripted model. Most use a fake
//! executor; the end-to-end ones use the real sandbox worker. Tests that
//! need a live Ollama server are marked #[ignore].

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use recall::agent::{AgentController, AgentError, ErrorKind, TranscriptStore};
use recall::config::{AgentConfig, SandboxConfig};
use recall::model::{ChatMessage, ModelClient, ModelError, OllamaClient, Role};
use recall::sandbox::{CodeExecutor, ExecutionResult, SafeValue, SandboxError, SandboxExecutor};
use recall::tools::MemoryRoot;
use tokio_util::sync::CancellationToken;

/// Replays canned completions and records every prompt it was given.
struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn prompt(&self, call: usize) -> Vec<ChatMessage> {
        self.seen.lock().unwrap()[call].clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ModelError::Unreachable {
                url: "scripted".into(),
                detail: "no more responses".into(),
            })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Returns the same result for every snippet and counts calls.
struct FixedExecutor {
    result: Result<ExecutionResult, SandboxError>,
    calls: Mutex<Vec<String>>,
}

impl FixedExecutor {
    fn ok(result: ExecutionResult) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(result),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn failing(error: SandboxError) -> Arc<Self> {
        Arc::new(Self {
            result: Err(error),
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CodeExecutor for FixedExecutor {
    async fn execute(&self, code: &str) -> Result<ExecutionResult, SandboxError> {
        self.calls.lock().unwrap().push(code.to_string());
        self.result.clone()
    }
}

/// Never finishes; used to test cancellation mid-execution.
struct HangingExecutor;

#[async_trait]
impl CodeExecutor for HangingExecutor {
    async fn execute(&self, _code: &str) -> Result<ExecutionResult, SandboxError> {
        std::future::pending().await
    }
}

const CODE: &str = "<think>check memory</think>\n<python>\nresult = read_file('user.md')\n</python>";
const REPLY: &str = "<think>found it</think>\n<reply>Your name is Ada.</reply>";

fn config(max_turns: usize) -> AgentConfig {
    AgentConfig {
        max_turns,
        system_prompt: Some("You are a memory agent.".to_string()),
        ..AgentConfig::default()
    }
}

/// Test that AgentConfig has sensible defaults
#[test]
fn test_agent_config_defaults() {
    let config = AgentConfig::default();

    assert_eq!(config.model, "qwen3");
    assert_eq!(config.max_turns, 20);
    assert_eq!(config.sandbox.timeout_seconds, 20);
    assert!(config.system_prompt.is_none());
    assert!(config.transcript_dir.is_none());
}

#[tokio::test]
async fn test_reply_on_first_turn() {
    let model = ScriptedModel::new(&[REPLY]);
    let executor = FixedExecutor::ok(ExecutionResult::default());
    let agent = AgentController::new(model.clone(), executor.clone(), config(20));

    let result = agent.run("What is my name?", &[]).await.unwrap();

    assert_eq!(result.reply, "Your name is Ada.");
    assert_eq!(result.turns, 1);
    assert!(result.executions.is_empty());
    assert!(executor.calls.lock().unwrap().is_empty());

    let prompt = model.prompt(0);
    assert_eq!(prompt[0], ChatMessage::system("You are a memory agent."));
    assert_eq!(prompt[1], ChatMessage::user("What is my name?"));
}

#[tokio::test]
async fn test_execution_result_is_fed_back() {
    let model = ScriptedModel::new(&[CODE, REPLY]);
    let executor = FixedExecutor::ok(ExecutionResult {
        value: Some(SafeValue::Str("name: Ada".into())),
        ..ExecutionResult::default()
    });
    let agent = AgentController::new(model.clone(), executor.clone(), config(20));

    let result = agent.run("What is my name?", &[]).await.unwrap();

    assert_eq!(result.turns, 2);
    assert_eq!(executor.calls.lock().unwrap().as_slice(), ["result = read_file('user.md')"]);

    let second = model.prompt(1);
    assert_eq!(second.len(), 4);
    assert_eq!(second[2].role, Role::Assistant);
    assert_eq!(second[3].role, Role::User);
    assert_eq!(
        second[3].content,
        "<result>\nstdout:\nresult: \"name: Ada\"\n</result>"
    );
}

#[tokio::test]
async fn test_filters_are_appended_to_query() {
    let model = ScriptedModel::new(&[REPLY]);
    let agent = AgentController::new(model.clone(), FixedExecutor::ok(ExecutionResult::default()), config(20));
    let filters = vec!["do not reveal ages".to_string()];

    agent.run("How old is Bob?", &filters).await.unwrap();

    assert_eq!(
        model.prompt(0)[1].content,
        "How old is Bob?\n\n<filter>do not reveal ages</filter>"
    );
}

#[tokio::test]
async fn test_turn_budget_exhausted_is_an_error() {
    let model = ScriptedModel::new(&[CODE, CODE, CODE, CODE]);
    let agent = AgentController::new(model.clone(), FixedExecutor::ok(ExecutionResult::default()), config(3));

    let err = agent.run("loop forever", &[]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TurnBudgetExhausted);
    assert!(matches!(err, AgentError::TurnBudgetExhausted { turns: 3 }));
    assert_eq!(model.calls(), 3);
}

#[tokio::test]
async fn test_parse_failure_gets_one_retry() {
    let model = ScriptedModel::new(&["<reply>forgot to think</reply>", REPLY]);
    let agent = AgentController::new(model.clone(), FixedExecutor::ok(ExecutionResult::default()), config(20));

    let result = agent.run("q", &[]).await.unwrap();
    assert_eq!(result.reply, "Your name is Ada.");

    let note = &model.prompt(1)[3];
    assert_eq!(note.role, Role::User);
    assert!(note.content.starts_with("<result>\nFormat error:"));
}

#[tokio::test]
async fn test_parse_failure_counter_resets_after_success() {
    let model = ScriptedModel::new(&["garbage", CODE, "garbage again", REPLY]);
    let agent = AgentController::new(model, FixedExecutor::ok(ExecutionResult::default()), config(20));

    let result = agent.run("q", &[]).await.unwrap();
    assert_eq!(result.turns, 4);
}

#[tokio::test]
async fn test_two_consecutive_parse_failures_fail() {
    let model = ScriptedModel::new(&[
        "<think>a</think><python>x = 1</python><reply>both</reply>",
        "<think>unterminated",
        REPLY,
    ]);
    let agent = AgentController::new(model.clone(), FixedExecutor::ok(ExecutionResult::default()), config(20));

    let err = agent.run("q", &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedOutput);
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn test_model_failure_is_fatal() {
    let model = ScriptedModel::new(&[CODE]);
    let agent = AgentController::new(model, FixedExecutor::ok(ExecutionResult::default()), config(20));

    let err = agent.run("q", &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Model);
}

#[tokio::test]
async fn test_sandbox_errors_are_fed_back_but_spawn_is_fatal() {
    let model = ScriptedModel::new(&[CODE, REPLY]);
    let executor = FixedExecutor::ok(ExecutionResult::failed(SandboxError::Timeout { seconds: 20 }));
    let agent = AgentController::new(model.clone(), executor, config(20));
    let result = agent.run("q", &[]).await.unwrap();
    assert!(model.prompt(1)[3].content.contains("error: Timeout"));
    assert_eq!(result.executions.len(), 1);

    let model = ScriptedModel::new(&[CODE, REPLY]);
    let executor = FixedExecutor::failing(SandboxError::Spawn { detail: "no worker".into() });
    let agent = AgentController::new(model.clone(), executor, config(20));
    let err = agent.run("q", &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Sandbox);
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_cancel_during_execution() {
    let model = ScriptedModel::new(&[CODE, REPLY]);
    let agent = AgentController::new(model, Arc::new(HangingExecutor), config(20));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(5), agent.run_with_cancel("q", &[], cancel))
        .await
        .expect("cancellation should end the run")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[tokio::test]
async fn test_transcripts_saved_for_success_and_failure() {
    let dir = tempfile::tempdir().unwrap();

    let model = ScriptedModel::new(&[REPLY]);
    let agent = AgentController::new(model, FixedExecutor::ok(ExecutionResult::default()), config(20))
        .with_transcripts(TranscriptStore::new(dir.path()).unwrap());
    let result = agent.run("Hello", &[]).await.unwrap();

    let model = ScriptedModel::new(&[]);
    let agent = AgentController::new(model, FixedExecutor::ok(ExecutionResult::default()), config(20))
        .with_transcripts(TranscriptStore::new(dir.path()).unwrap());
    agent.run("Hello again", &[]).await.unwrap_err();

    let store = TranscriptStore::new(dir.path()).unwrap();
    let listed = store.list().unwrap();
    assert_eq!(listed.len(), 2);

    let saved = store.load(&result.trace_id).unwrap();
    assert_eq!(saved.outcome, "reply");
    assert_eq!(saved.messages, result.conversation);
    assert!(listed.iter().any(|t| t.outcome == "model"));
}

/// End to end: scripted model, real sandbox worker, real memory directory.
#[tokio::test]
async fn test_end_to_end_with_real_sandbox() {
    let dir = tempfile::tempdir().unwrap();
    let root = MemoryRoot::open(dir.path()).unwrap();
    let executor = SandboxExecutor::with_worker(
        env!("CARGO_BIN_EXE_recall-sandbox"),
        &root,
        SandboxConfig::default(),
    );

    let model = ScriptedModel::new(&[
        "<think>save it</think><python>\ncreate_file('user.md', '# User\\nname: Ada\\n')\nresult = 'saved'\n</python>",
        "<think>read back</think><python>\nresult = read_file('user.md')\n</python>",
        "<think>done</think><reply>Noted, Ada.</reply>",
    ]);
    let agent = AgentController::new(model.clone(), Arc::new(executor), config(20));

    let result = agent.run("My name is Ada", &[]).await.unwrap();
    assert_eq!(result.reply, "Noted, Ada.");
    assert_eq!(result.executions.len(), 2);
    assert_eq!(
        result.executions[1].result.value,
        Some(SafeValue::Str("# User\nname: Ada\n".into()))
    );
    assert_eq!(std::fs::read_to_string(dir.path().join("user.md")).unwrap(), "# User\nname: Ada\n");
}

/// Live processes whose working directory is `root` (workers run there).
fn workers_in(root: &Path) -> Vec<u32> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse::<u32>().ok())
        .filter(|pid| fs::read_link(format!("/proc/{}/cwd", pid)).map_or(false, |cwd| cwd == root))
        .collect()
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_cancel_kills_running_worker() {
    let dir = tempfile::tempdir().unwrap();
    let root = MemoryRoot::open(dir.path()).unwrap();
    let executor = SandboxExecutor::with_worker(
        env!("CARGO_BIN_EXE_recall-sandbox"),
        &root,
        SandboxConfig::default(),
    );
    let model = ScriptedModel::new(&["<think>spin</think><python>\nwhile True:\n    pass\n</python>"]);
    let agent = AgentController::new(model, Arc::new(executor), config(20));
    let cancel = CancellationToken::new();

    let (outcome, started) = tokio::join!(agent.run_with_cancel("q", &[], cancel.clone()), async {
        let started = wait_for(|| !workers_in(root.path()).is_empty()).await;
        cancel.cancel();
        started
    });

    assert!(started, "worker never showed up");
    assert_eq!(outcome.unwrap_err().kind(), ErrorKind::Cancelled);
    assert!(
        wait_for(|| workers_in(root.path()).is_empty()).await,
        "worker outlived the cancelled run"
    );
}

#[tokio::test]
#[ignore = "Requires Ollama running on localhost:11434"]
async fn test_agent_against_ollama() {
    let dir = tempfile::tempdir().unwrap();
    let root = MemoryRoot::open(dir.path()).unwrap();
    let executor = SandboxExecutor::with_worker(
        env!("CARGO_BIN_EXE_recall-sandbox"),
        &root,
        SandboxConfig::default(),
    );
    let model = OllamaClient::new("http://localhost:11434", "qwen3");
    let agent = AgentController::new(Arc::new(model), Arc::new(executor), AgentConfig::default());

    let result = agent.run("My favourite colour is green.", &[]).await.unwrap();
    assert!(!result.reply.is_empty());
}
