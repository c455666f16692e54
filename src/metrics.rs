//! Prometheus metrics for agent runs and sandbox executions
//!
//! Everything is registered in the default registry. [`gather_text`] renders
//! it in the text exposition format (`recall --print-metrics`).

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Agent Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Completed agent runs.
    ///
    /// Labels:
    /// - outcome: "reply" or the error kind ("turn_budget_exhausted", "model", ...)
    pub static ref AGENT_RUNS: IntCounterVec = register_int_counter_vec!(
        "recall_agent_runs_total",
        "Agent runs by outcome",
        &["outcome"]
    ).expect("failed to register AGENT_RUNS metric");

    /// Model calls needed per run.
    pub static ref AGENT_TURNS: Histogram = register_histogram!(
        "recall_agent_turns",
        "Model calls per agent run",
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 20.0, 30.0]
    ).expect("failed to register AGENT_TURNS metric");

    pub static ref MODEL_CALL_DURATION: Histogram = register_histogram!(
        "recall_model_call_seconds",
        "Latency of a single model completion",
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("failed to register MODEL_CALL_DURATION metric");

    /// Model turns that could not be parsed.
    pub static ref PARSE_FAILURES: IntCounter = register_int_counter!(
        "recall_parse_failures_total",
        "Model outputs rejected by the output parser"
    ).expect("failed to register PARSE_FAILURES metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Sandbox Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Snippet executions.
    ///
    /// Labels:
    /// - status: "success", "script_error", "tool_error", "timeout", "denied", "crashed", ...
    pub static ref CODE_EXECUTIONS: IntCounterVec = register_int_counter_vec!(
        "recall_code_executions_total",
        "Sandbox executions by status",
        &["status"]
    ).expect("failed to register CODE_EXECUTIONS metric");

    pub static ref CODE_EXECUTION_DURATION: Histogram = register_histogram!(
        "recall_code_execution_seconds",
        "Wall-clock time of a sandbox execution, including process startup",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0]
    ).expect("failed to register CODE_EXECUTION_DURATION metric");

    /// Tool API errors surfaced to the model.
    ///
    /// Labels:
    /// - kind: "path_escape", "not_found", "size_exceeded", ...
    pub static ref TOOL_ERRORS: IntCounterVec = register_int_counter_vec!(
        "recall_tool_errors_total",
        "Tool API errors by kind",
        &["kind"]
    ).expect("failed to register TOOL_ERRORS metric");
}

/// Render every registered metric in the Prometheus text format.
pub fn gather_text() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        return format!("# failed to encode metrics: {}\n", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
