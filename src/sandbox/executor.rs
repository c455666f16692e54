//! Host side of the sandbox
//!
//! [`SandboxExecutor`] spawns one `recall-sandbox` process per snippet,
//! hands it a [`WorkerRequest`], and collects its events under a wall-clock
//! timeout. The child is started with an empty environment, its working
//! directory set to the memory root, and `kill_on_drop`, so a cancelled
//! execution never leaves a worker behind.

use std::env;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, info_span, warn, Instrument};

use super::output::LimitedBuffer;
use super::policy::CapabilityPolicy;
use super::protocol::{WorkerEvent, WorkerRequest, SCHEMA_VERSION};
use super::{CodeExecutor, ExecutionFault, ExecutionResult, SafeValue, SandboxError};
use crate::config::{SandboxConfig, ENV_SANDBOX_WORKER};
use crate::metrics::{CODE_EXECUTIONS, CODE_EXECUTION_DURATION, TOOL_ERRORS};
use crate::script::parse_program;
use crate::tools::MemoryRoot;

/// File name of the worker binary.
pub const WORKER_BINARY: &str = "recall-sandbox";

/// How much worker stderr is kept for crash reports.
const STDERR_CAP: usize = 8 * 1024;

/// How long a worker may take to exit after sending `finished`.
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Runs snippets in child processes. Stateless between executions.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    worker: PathBuf,
    memory_root: PathBuf,
    policy: CapabilityPolicy,
    config: SandboxConfig,
}

/// What the event loop saw before the stream ended.
enum Exchange {
    Finished {
        value: Option<SafeValue>,
        error: Option<ExecutionFault>,
        diagnostics: Option<String>,
    },
    Eof,
}

impl SandboxExecutor {
    /// Create an executor, locating the worker binary from `config`.
    pub fn new(root: &MemoryRoot, config: SandboxConfig) -> Result<Self, SandboxError> {
        let worker = locate_worker(config.worker_path.as_deref())?;
        Ok(Self::with_worker(worker, root, config))
    }

    /// Create an executor with an explicit worker binary.
    pub fn with_worker(worker: impl Into<PathBuf>, root: &MemoryRoot, config: SandboxConfig) -> Self {
        Self {
            worker: worker.into(),
            memory_root: root.path().to_path_buf(),
            policy: CapabilityPolicy::new(config.denied_capabilities.iter().copied()),
            config,
        }
    }

    pub fn worker_path(&self) -> &Path {
        &self.worker
    }

    pub fn memory_root(&self) -> &Path {
        &self.memory_root
    }

    fn request(&self, code: &str) -> WorkerRequest {
        WorkerRequest {
            code: code.to_string(),
            memory_root: self.memory_root.clone(),
            limits: self.config.limits,
            denied_capabilities: self.config.denied_capabilities.clone(),
            result_variable: self.config.result_variable.clone(),
            // One second of headroom so the wall clock normally fires first
            cpu_seconds: self.config.timeout_seconds + 1,
            memory_limit_bytes: self.config.memory_limit_bytes,
            max_output_bytes: self.config.max_output_bytes,
        }
    }

    async fn run(&self, code: &str) -> Result<ExecutionResult, SandboxError> {
        // Cheap rejections happen here, before paying for a process.
        let program = match parse_program(code) {
            Ok(program) => program,
            Err(e) => {
                return Ok(ExecutionResult {
                    diagnostics: Some(e.to_string()),
                    ..ExecutionResult::default()
                })
            }
        };
        if let Err(denial) = self.policy.scan(&program) {
            info!(
                capability = %denial.capability,
                identifier = %denial.identifier,
                line = denial.line,
                "snippet rejected before execution"
            );
            return Ok(ExecutionResult::failed(SandboxError::CapabilityDenied {
                capability: denial.capability,
                identifier: denial.identifier,
            }));
        }

        let payload = match serde_json::to_vec(&self.request(code)) {
            Ok(payload) => payload,
            Err(e) => {
                return Ok(ExecutionResult::failed(SandboxError::Protocol {
                    detail: format!("failed to encode request: {}", e),
                }))
            }
        };

        let mut child = Command::new(&self.worker)
            .env_clear()
            .current_dir(&self.memory_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Spawn {
                detail: format!("{}: {}", self.worker.display(), e),
            })?;
        debug!(pid = ?child.id(), worker = %self.worker.display(), "sandbox worker started");

        let stderr = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_capped(stderr, STDERR_CAP)));
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();

        let mut captured = LimitedBuffer::new(self.config.max_output_bytes as usize);
        let limit = Duration::from_secs(self.config.timeout_seconds);
        let outcome = tokio::time::timeout(limit, exchange(stdin, stdout, payload, &mut captured)).await;

        let result = match outcome {
            Err(_) => {
                warn!(seconds = self.config.timeout_seconds, "execution timed out, killing worker");
                terminate(&mut child).await;
                ExecutionResult {
                    stdout: captured.into_string(),
                    error: Some(
                        SandboxError::Timeout {
                            seconds: self.config.timeout_seconds,
                        }
                        .into(),
                    ),
                    timed_out: true,
                    ..ExecutionResult::default()
                }
            }
            Ok(Err(e)) => {
                terminate(&mut child).await;
                ExecutionResult {
                    stdout: captured.into_string(),
                    error: Some(e.into()),
                    ..ExecutionResult::default()
                }
            }
            Ok(Ok(Exchange::Finished { value, error, diagnostics })) => {
                match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                    Ok(Ok(status)) if !status.success() => {
                        debug!(%status, "worker exited uncleanly after finishing")
                    }
                    Ok(_) => {}
                    Err(_) => terminate(&mut child).await,
                }
                ExecutionResult {
                    stdout: captured.into_string(),
                    value,
                    error,
                    diagnostics,
                    timed_out: false,
                }
            }
            Ok(Ok(Exchange::Eof)) => {
                let status = match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                    Ok(status) => status.ok(),
                    Err(_) => {
                        terminate(&mut child).await;
                        None
                    }
                };
                let stderr = match stderr {
                    Some(handle) => handle.await.unwrap_or_default(),
                    None => String::new(),
                };
                let detail = crash_detail(status, &stderr);
                warn!(%detail, "sandbox worker crashed");
                ExecutionResult {
                    stdout: captured.into_string(),
                    error: Some(SandboxError::Crashed { detail }.into()),
                    ..ExecutionResult::default()
                }
            }
        };

        Ok(result)
    }
}

#[async_trait]
impl CodeExecutor for SandboxExecutor {
    async fn execute(&self, code: &str) -> Result<ExecutionResult, SandboxError> {
        let span = info_span!("code_execution", code_len = code.len());
        let start = Instant::now();

        let result = self.run(code).instrument(span).await;

        CODE_EXECUTION_DURATION.observe(start.elapsed().as_secs_f64());
        match &result {
            Ok(result) => {
                CODE_EXECUTIONS.with_label_values(&[result.status()]).inc();
                if let Some(ExecutionFault::Tool(e)) = &result.error {
                    TOOL_ERRORS.with_label_values(&[e.label()]).inc();
                }
                debug!(
                    status = result.status(),
                    stdout_bytes = result.stdout.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "execution finished"
                );
            }
            Err(e) => {
                CODE_EXECUTIONS.with_label_values(&[e.label()]).inc();
            }
        }
        result
    }
}

/// Send the request, then read events until `finished` or EOF.
async fn exchange<W, R>(
    stdin: Option<W>,
    stdout: Option<R>,
    payload: Vec<u8>,
    captured: &mut LimitedBuffer,
) -> Result<Exchange, SandboxError>
where
    W: tokio::io::AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    if let Some(mut stdin) = stdin {
        if let Err(e) = stdin.write_all(&payload).await {
            // A worker that died early shows up as EOF below.
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                warn!(error = %e, "failed to write worker request");
            }
        }
        // Dropping stdin closes the pipe so the worker sees EOF.
    }

    let Some(stdout) = stdout else {
        return Ok(Exchange::Eof);
    };
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(Exchange::Eof),
            Err(e) => {
                return Err(SandboxError::Protocol {
                    detail: format!("failed to read worker output: {}", e),
                })
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event: WorkerEvent = serde_json::from_str(&line).map_err(|e| SandboxError::Protocol {
            detail: format!("malformed worker event: {}", e),
        })?;
        match event {
            WorkerEvent::Stdout { text } => {
                captured.push(&text);
            }
            WorkerEvent::Finished {
                schema_version,
                value,
                error,
                diagnostics,
            } => {
                if schema_version != SCHEMA_VERSION {
                    return Err(SandboxError::Protocol {
                        detail: format!(
                            "worker speaks schema v{}, expected v{}",
                            schema_version, SCHEMA_VERSION
                        ),
                    });
                }
                if let Some(value) = &value {
                    value
                        .validate()
                        .map_err(|detail| SandboxError::Unserializable { detail })?;
                }
                return Ok(Exchange::Finished {
                    value,
                    error,
                    diagnostics,
                });
            }
        }
    }
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "worker already gone");
    }
    if let Err(e) = child.wait().await {
        warn!(error = %e, "failed to reap sandbox worker");
    }
}

/// Read a stream to the end, keeping at most `limit` bytes.
async fn drain_capped<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> String {
    let mut captured = LimitedBuffer::new(limit);
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                captured.push(&String::from_utf8_lossy(&chunk[..n]));
            }
        }
    }
    captured.into_string()
}

fn crash_detail(status: Option<ExitStatus>, stderr: &str) -> String {
    let mut detail = match status {
        Some(status) => match (status.code(), status.signal()) {
            (_, Some(libc::SIGXCPU)) => "worker exceeded its CPU limit".to_string(),
            (_, Some(signal)) => format!("worker killed by signal {}", signal),
            (Some(code), _) => format!("worker exited with status {} before finishing", code),
            (None, None) => "worker exited before finishing".to_string(),
        },
        None => "worker exited before finishing".to_string(),
    };

    if let Some(last) = stderr.lines().rev().find(|line| !line.trim().is_empty()) {
        detail.push_str(": ");
        detail.push_str(last.trim());
    }
    detail
}

/// Find the worker binary.
///
/// An explicit path wins, then `RECALL_SANDBOX_WORKER`. Otherwise look
/// next to the running executable, stepping out of cargo's `deps/`
/// directory when running under a test harness.
pub fn locate_worker(configured: Option<&Path>) -> Result<PathBuf, SandboxError> {
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env::var_os(ENV_SANDBOX_WORKER) {
        return Ok(PathBuf::from(path));
    }

    let exe = env::current_exe().map_err(|e| SandboxError::Spawn {
        detail: format!("cannot locate current executable: {}", e),
    })?;
    let mut dir = exe.parent().map(Path::to_path_buf).unwrap_or_default();
    if dir.ends_with("deps") {
        dir.pop();
    }

    let candidate = dir.join(WORKER_BINARY);
    if candidate.is_file() {
        Ok(candidate)
    } else {
        Err(SandboxError::Spawn {
            detail: format!("worker binary not found at {}", candidate.display()),
        })
    }
}
