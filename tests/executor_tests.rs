//! Integration tests for the sandbox executor
//!
//! These run snippets through the real `recall-sandbox` worker binary that
//! cargo builds alongside the tests.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use recall::config::SandboxConfig;
use recall::sandbox::{CodeExecutor, ExecutionFault, SafeValue, SandboxError, SandboxExecutor};
use recall::tools::{MemoryRoot, ToolError};
use tempfile::TempDir;

const WORKER: &str = env!("CARGO_BIN_EXE_recall-sandbox");

fn executor_with(config: SandboxConfig) -> (TempDir, SandboxExecutor) {
    let dir = tempfile::tempdir().unwrap();
    let root = MemoryRoot::open(dir.path()).unwrap();
    let executor = SandboxExecutor::with_worker(WORKER, &root, config);
    (dir, executor)
}

fn executor() -> (TempDir, SandboxExecutor) {
    executor_with(SandboxConfig::default())
}

/// Live processes whose working directory is `root`. Every worker runs with
/// its memory root as cwd, so this finds the workers of one executor.
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
async fn test_prints_and_result_cross_the_boundary() {
    let (_dir, executor) = executor();
    let result = executor
        .execute("print('hello', 42)\nresult = {'n': 1 + 1, 'xs': [1, 'two', None]}")
        .await
        .unwrap();

    assert!(result.is_success(), "{:?}", result);
    assert_eq!(result.stdout, "hello 42\n");
    let Some(SafeValue::Map(map)) = result.value else {
        panic!("expected a map, got {:?}", result.value);
    };
    assert_eq!(map["n"], SafeValue::Int(2));
    assert_eq!(
        map["xs"],
        SafeValue::List(vec![SafeValue::Int(1), SafeValue::Str("two".into()), SafeValue::Null])
    );
}

#[tokio::test]
async fn test_memory_persists_between_executions() {
    let (dir, executor) = executor();
    let first = executor
        .execute("create_file('entities/alice.md', '# Alice\\nlikes tea\\n')")
        .await
        .unwrap();
    assert!(first.is_success(), "{:?}", first);
    assert!(dir.path().join("entities/alice.md").is_file());

    // Variables do not survive; files do.
    let second = executor
        .execute("result = go_to_link('[[entities/alice]]')")
        .await
        .unwrap();
    assert_eq!(second.value, Some(SafeValue::Str("# Alice\nlikes tea\n".into())));
}

#[tokio::test]
async fn test_timeout_kills_and_keeps_partial_stdout() {
    let (_dir, executor) = executor_with(SandboxConfig {
        timeout_seconds: 1,
        ..SandboxConfig::default()
    });

    let start = Instant::now();
    let result = executor
        .execute("print('started')\nwhile True:\n    pass")
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(result.timed_out);
    assert_eq!(
        result.error,
        Some(ExecutionFault::Sandbox(SandboxError::Timeout { seconds: 1 }))
    );
    assert_eq!(result.stdout, "started\n");
    assert!(result.value.is_none());
}

#[tokio::test]
async fn test_denied_capabilities() {
    let (dir, executor) = executor();
    for code in [
        "eval('1 + 1')",
        "import subprocess",
        "f = open('/etc/passwd')",
        "x = __import__('os')",
        "g = globals()",
    ] {
        let result = executor.execute(code).await.unwrap();
        assert!(
            matches!(
                result.error,
                Some(ExecutionFault::Sandbox(SandboxError::CapabilityDenied { .. }))
            ),
            "{} was not denied: {:?}",
            code,
            result
        );
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_path_escape_is_fed_back() {
    let (_dir, executor) = executor();
    for code in ["read_file('../../etc/passwd')", "create_file('/tmp/owned.md', 'x')"] {
        let result = executor.execute(code).await.unwrap();
        assert!(
            matches!(result.error, Some(ExecutionFault::Tool(ToolError::PathEscape { .. }))),
            "{:?}",
            result
        );
    }
    assert!(!std::path::Path::new("/tmp/owned.md").exists());
}

#[tokio::test]
async fn test_unserializable_result() {
    let (_dir, executor) = executor();
    let result = executor.execute("result = {1: 'one'}").await.unwrap();
    assert!(matches!(
        result.error,
        Some(ExecutionFault::Sandbox(SandboxError::Unserializable { .. }))
    ));
    assert!(result.value.is_none());
}

#[tokio::test]
async fn test_script_errors_are_diagnostics() {
    let (_dir, executor) = executor();
    let result = executor.execute("print('a')\nx = 1 / 0").await.unwrap();
    assert!(result.error.is_none());
    assert_eq!(result.stdout, "a\n");
    let diagnostics = result.diagnostics.unwrap();
    assert!(diagnostics.contains("ZeroDivisionError"), "{}", diagnostics);
    assert!(diagnostics.starts_with("line 2"));
}

#[tokio::test]
async fn test_size_limit_performs_no_write() {
    let mut config = SandboxConfig::default();
    config.limits.per_file = 16;
    let (dir, executor) = executor_with(config);

    let result = executor
        .execute("create_file('big.md', 'x' * 100)")
        .await
        .unwrap();
    assert!(matches!(
        result.error,
        Some(ExecutionFault::Tool(ToolError::SizeExceeded { .. }))
    ));
    assert!(!dir.path().join("big.md").exists());
}

#[tokio::test]
async fn test_output_is_capped() {
    let (_dir, executor) = executor_with(SandboxConfig {
        max_output_bytes: 100,
        ..SandboxConfig::default()
    });
    let result = executor
        .execute("for i in range(1000):\n    print('line', i)\nresult = 'done'")
        .await
        .unwrap();
    assert!(result.stdout.len() < 200);
    assert!(result.stdout.contains("[output truncated]"));
    assert_eq!(result.value, Some(SafeValue::Str("done".into())));
}

#[tokio::test]
async fn test_dropped_execution_does_not_poison_executor() {
    let (_dir, executor) = executor();
    let cancelled = tokio::time::timeout(
        Duration::from_millis(300),
        executor.execute("while True:\n    pass"),
    )
    .await;
    assert!(cancelled.is_err());

    let result = executor.execute("result = 7").await.unwrap();
    assert_eq!(result.value, Some(SafeValue::Int(7)));
}

#[tokio::test]
async fn test_timeout_reaps_the_worker() {
    let (dir, executor) = executor_with(SandboxConfig {
        timeout_seconds: 1,
        ..SandboxConfig::default()
    });
    let root = dir.path().canonicalize().unwrap();

    let (result, started) = tokio::join!(
        executor.execute("while True:\n    pass"),
        wait_for(|| !workers_in(&root).is_empty())
    );
    assert!(started, "worker never showed up");
    assert!(result.unwrap().timed_out);
    assert_eq!(workers_in(&root), Vec::<u32>::new());
}

#[tokio::test]
async fn test_dropped_execution_kills_the_worker() {
    let (dir, executor) = executor();
    let root = dir.path().canonicalize().unwrap();

    {
        let execution = executor.execute("while True:\n    pass");
        tokio::pin!(execution);
        let started = tokio::select! {
            _ = &mut execution => false,
            started = wait_for(|| !workers_in(&root).is_empty()) => started,
        };
        assert!(started, "worker never showed up");
    }

    // The execution was dropped mid-flight above
    assert!(wait_for(|| workers_in(&root).is_empty()).await, "worker outlived its execution");
}

#[tokio::test]
async fn test_deep_nesting_is_rejected_on_the_host() {
    let dir = tempfile::tempdir().unwrap();
    let root = MemoryRoot::open(dir.path()).unwrap();
    // No worker binary: only host-side checks run
    let host_only =
        SandboxExecutor::with_worker("/nonexistent/recall-sandbox", &root, SandboxConfig::default());

    for depth in [300, 3_000, 20_000] {
        let code = format!("result = {}1{}", "(".repeat(depth), ")".repeat(depth));
        let result = tokio::spawn({
            let host_only = host_only.clone();
            async move { host_only.execute(&code).await }
        })
        .await
        .unwrap()
        .unwrap();
        let diagnostics = result.diagnostics.unwrap();
        assert!(diagnostics.contains("SyntaxError"), "{}", diagnostics);
        assert!(result.value.is_none());
    }

    let (_dir, real) = executor();
    let code = format!("result = {}1{}", "[".repeat(20), "]".repeat(20));
    let result = real.execute(&code).await.unwrap();
    assert!(result.is_success(), "{:?}", result);
}

#[tokio::test]
async fn test_executions_run_concurrently() {
    let (_dir, executor) = executor();
    let (a, b) = tokio::join!(
        executor.execute("result = 'a'"),
        executor.execute("result = 'b'")
    );
    assert_eq!(a.unwrap().value, Some(SafeValue::Str("a".into())));
    assert_eq!(b.unwrap().value, Some(SafeValue::Str("b".into())));
}
