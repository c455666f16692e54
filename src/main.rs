//! # recall CLI
//!
//! Ask the memory agent one question against a memory directory.
//!
//! Usage:
//!   recall [OPTIONS] <query>...
//!   recall transcripts [--dir <path>]
//!
//! Examples:
//!   recall --memory-path ./memory "What is my sister's name?"
//!   recall --filter "do not reveal ages" "How old is Bob?"
//!   recall --save-transcripts ./transcripts "I just moved to Lisbon"

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use recall::agent::{AgentController, ErrorKind, TranscriptStore};
use recall::config::{AgentConfig, ConfigError};
use recall::model::OllamaClient;
use recall::sandbox::SandboxExecutor;
use recall::tools::MemoryRoot;

#[derive(Parser)]
#[command(name = "recall")]
#[command(author, version, about = "recall - a memory agent over a markdown knowledge base")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Question for the agent (when not using subcommands)
    #[arg(trailing_var_arg = true)]
    query: Vec<String>,

    /// Memory directory (created if missing)
    #[arg(short, long, global = true)]
    memory_path: Option<PathBuf>,

    /// Ollama model name
    #[arg(long, global = true)]
    model: Option<String>,

    /// Ollama base URL
    #[arg(long, global = true)]
    ollama_url: Option<String>,

    /// Constraint on what the reply may reveal (repeatable)
    #[arg(short, long = "filter")]
    filters: Vec<String>,

    /// File whose non-empty lines are filters
    #[arg(long)]
    filters_file: Option<PathBuf>,

    /// Maximum model calls per question
    #[arg(long)]
    max_turns: Option<usize>,

    /// Sandbox wall-clock timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Save a transcript of the run into this directory
    #[arg(long, global = true)]
    save_transcripts: Option<PathBuf>,

    /// Log as JSON instead of human-readable text
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print Prometheus metrics to stderr after the run
    #[arg(long)]
    print_metrics: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question
    Ask {
        /// The question
        #[arg(trailing_var_arg = true, required = true)]
        query: Vec<String>,
    },
    /// List saved transcripts, newest first
    Transcripts,
}

#[tokio::main]
async fn main() -> ExitCode {
    // .env is optional
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Err(e) = recall::tracing::init_tracing(cli.json_logs) {
        eprintln!("warning: failed to initialize logging: {}", e);
    }

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };

    let query = match &cli.command {
        Some(Commands::Transcripts) => return list_transcripts(&config),
        Some(Commands::Ask { query }) => query.join(" "),
        None => cli.query.join(" "),
    };
    if query.trim().is_empty() {
        eprintln!("error: no question given (try `recall --help`)");
        return ExitCode::from(2);
    }

    let filters = match load_filters(&cli) {
        Ok(filters) => filters,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };

    let code = ask(&config, &query, &filters).await;
    if cli.print_metrics {
        eprint!("{}", recall::metrics::gather_text());
    }
    code
}

async fn ask(config: &AgentConfig, query: &str, filters: &[String]) -> ExitCode {
    let root = match MemoryRoot::create(&config.memory_root) {
        Ok(root) => root,
        Err(e) => {
            eprintln!("error: memory directory {}: {}", config.memory_root.display(), e);
            return ExitCode::from(2);
        }
    };
    let executor = match SandboxExecutor::new(&root, config.sandbox.clone()) {
        Ok(executor) => executor,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };
    info!(
        memory = %root.path().display(),
        worker = %executor.worker_path().display(),
        model = %config.model,
        "recall ready"
    );

    let model = OllamaClient::new(&config.ollama_url, &config.model);
    let mut agent = AgentController::new(Arc::new(model), Arc::new(executor), config.clone());
    if let Some(dir) = &config.transcript_dir {
        match TranscriptStore::new(dir) {
            Ok(store) => agent = agent.with_transcripts(store),
            Err(e) => warn!(dir = %dir.display(), error = %e, "transcripts disabled"),
        }
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    match agent.run_with_cancel(query, filters, cancel).await {
        Ok(result) => {
            println!("{}", result.reply);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error[{}]: {}", e.kind(), e);
            match e.kind() {
                ErrorKind::Cancelled => ExitCode::from(130),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn list_transcripts(config: &AgentConfig) -> ExitCode {
    let Some(dir) = &config.transcript_dir else {
        eprintln!("error: no transcript directory (use --save-transcripts or RECALL_TRANSCRIPT_DIR)");
        return ExitCode::from(2);
    };
    let listed = TranscriptStore::new(dir).and_then(|store| store.list());
    match listed {
        Ok(transcripts) => {
            for t in transcripts {
                println!(
                    "{}  {}  {:>2} turns  {:<22} {}",
                    t.id,
                    t.started_at.format("%Y-%m-%d %H:%M:%S"),
                    t.turns,
                    t.outcome,
                    t.query
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}: {}", dir.display(), e);
            ExitCode::FAILURE
        }
    }
}

/// Defaults, then `RECALL_*` variables, then flags.
fn build_config(cli: &Cli) -> Result<AgentConfig, ConfigError> {
    let mut config = AgentConfig::from_env()?;
    if let Some(path) = &cli.memory_path {
        config.memory_root = path.clone();
    }
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(url) = &cli.ollama_url {
        config.ollama_url = url.trim_end_matches('/').to_string();
    }
    if let Some(turns) = cli.max_turns {
        config.max_turns = turns;
    }
    if let Some(timeout) = cli.timeout {
        config.sandbox.timeout_seconds = timeout;
    }
    if let Some(dir) = &cli.save_transcripts {
        config.transcript_dir = Some(dir.clone());
    }
    Ok(config)
}

fn load_filters(cli: &Cli) -> Result<Vec<String>, String> {
    let mut filters = cli.filters.clone();
    if let Some(path) = &cli.filters_file {
        let text = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        filters.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
    }
    Ok(filters)
}
